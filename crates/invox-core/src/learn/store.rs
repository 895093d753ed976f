//! Persistence for learned algorithms
//!
//! One JSON file per supplier key. Writes go through a temp file in the
//! same directory so a crash mid-write never leaves a half-written
//! algorithm behind.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::LearnedAlgorithm;

/// Storage interface for learned algorithms, keyed by normalized supplier key
pub trait AlgorithmStore: Send + Sync {
    fn get(&self, supplier_key: &str) -> Result<Option<LearnedAlgorithm>>;
    fn put(&self, algorithm: &LearnedAlgorithm) -> Result<()>;
    fn remove(&self, supplier_key: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<LearnedAlgorithm>>;
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, LearnedAlgorithm>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlgorithmStore for MemoryStore {
    fn get(&self, supplier_key: &str) -> Result<Option<LearnedAlgorithm>> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| Error::Training("Algorithm store lock poisoned".into()))?
            .get(supplier_key)
            .cloned())
    }

    fn put(&self, algorithm: &LearnedAlgorithm) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| Error::Training("Algorithm store lock poisoned".into()))?
            .insert(algorithm.supplier_key.clone(), algorithm.clone());
        Ok(())
    }

    fn remove(&self, supplier_key: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| Error::Training("Algorithm store lock poisoned".into()))?
            .remove(supplier_key)
            .is_some())
    }

    fn list(&self) -> Result<Vec<LearnedAlgorithm>> {
        let mut algorithms: Vec<_> = self
            .inner
            .lock()
            .map_err(|_| Error::Training("Algorithm store lock poisoned".into()))?
            .values()
            .cloned()
            .collect();
        algorithms.sort_by(|a, b| a.supplier_key.cmp(&b.supplier_key));
        Ok(algorithms)
    }
}

/// File-backed store: `<dir>/<supplier_key>.json`
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Default location under the platform data dir
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("invox").join("algorithms"))
    }

    fn path_for(&self, supplier_key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", supplier_key))
    }
}

impl AlgorithmStore for FileStore {
    fn get(&self, supplier_key: &str) -> Result<Option<LearnedAlgorithm>> {
        let path = self.path_for(supplier_key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let algorithm = serde_json::from_str(&raw)
            .map_err(|e| Error::Training(format!("Corrupt algorithm file {}: {}", path.display(), e)))?;
        Ok(Some(algorithm))
    }

    fn put(&self, algorithm: &LearnedAlgorithm) -> Result<()> {
        let path = self.path_for(&algorithm.supplier_key);
        let json = serde_json::to_string_pretty(algorithm)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::io::Write::write_all(&mut tmp, json.as_bytes())?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        debug!(path = %path.display(), "Persisted learned algorithm");
        Ok(())
    }

    fn remove(&self, supplier_key: &str) -> Result<bool> {
        let path = self.path_for(supplier_key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<LearnedAlgorithm>> {
        let mut algorithms = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str::<LearnedAlgorithm>(&raw).map_err(Error::from))
            {
                Ok(algorithm) => algorithms.push(algorithm),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable algorithm file")
                }
            }
        }
        algorithms.sort_by(|a, b| a.supplier_key.cmp(&b.supplier_key));
        Ok(algorithms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlgorithmPatterns, ProcessingRules};
    use chrono::Utc;

    fn algorithm(key: &str) -> LearnedAlgorithm {
        LearnedAlgorithm {
            supplier_key: key.to_string(),
            supplier_name: key.to_string(),
            patterns: AlgorithmPatterns {
                line_item: "^$".into(),
                groups: HashMap::new(),
                invoice_number: None,
                date: None,
            },
            processing: ProcessingRules {
                currency: "ZAR".into(),
                tax_rate: 15.0,
                prices_include_tax: false,
                has_discounts: false,
                date_format: None,
            },
            version: 1,
            created_at: Utc::now(),
            training_count: 1,
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("medis").unwrap().is_none());
        store.put(&algorithm("medis")).unwrap();
        assert!(store.get("medis").unwrap().is_some());
        assert!(store.remove("medis").unwrap());
        assert!(!store.remove("medis").unwrap());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.put(&algorithm("medis")).unwrap();
        store.put(&algorithm("transpharm")).unwrap();

        let loaded = store.get("medis").unwrap().unwrap();
        assert_eq!(loaded.supplier_key, "medis");

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].supplier_key, "medis");

        assert!(store.remove("medis").unwrap());
        assert!(store.get("medis").unwrap().is_none());
    }

    #[test]
    fn test_file_store_overwrite_bumps_nothing_itself() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.put(&algorithm("medis")).unwrap();
        let mut updated = algorithm("medis");
        updated.version = 2;
        store.put(&updated).unwrap();

        assert_eq!(store.get("medis").unwrap().unwrap().version, 2);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_skips_corrupt_files_in_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put(&algorithm("medis")).unwrap();
        fs::write(dir.path().join("broken.json"), "not json").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }
}
