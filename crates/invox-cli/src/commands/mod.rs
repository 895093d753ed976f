//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `process` - Invoice extraction command
//! - `train` - Supplier training command
//! - `algorithms` - Learned-algorithm management (list, forget)
//! - `matching` - Catalog product matching
//! - `prompts` - Prompt library inspection
//! - `status` - Backend and store status

pub mod algorithms;
pub mod matching;
pub mod process;
pub mod prompts;
pub mod status;
pub mod train;

// Re-export command functions for main.rs
pub use algorithms::*;
pub use matching::*;
pub use process::*;
pub use prompts::*;
pub use status::*;
pub use train::*;

use std::path::Path;

use anyhow::{Context, Result};
use invox_core::learn::FileStore;
use invox_core::{ExtractionConfig, LearningManager, ModelClient, Pipeline};

/// Open the learned-algorithm store, defaulting to the platform data dir
pub fn open_learning(algorithms_dir: Option<&Path>) -> Result<LearningManager> {
    let dir = match algorithms_dir {
        Some(dir) => dir.to_path_buf(),
        None => FileStore::default_dir()
            .context("Could not determine a data directory; pass --algorithms-dir")?,
    };
    let store = FileStore::new(&dir)
        .with_context(|| format!("Could not open algorithm store at {}", dir.display()))?;
    Ok(LearningManager::new(Box::new(store)))
}

/// Build the full pipeline from environment configuration
pub fn open_pipeline(algorithms_dir: Option<&Path>) -> Result<Pipeline> {
    let client = ModelClient::from_env().context(
        "No model backend configured. Set OLLAMA_HOST (e.g. http://localhost:11434), \
         or INVOX_BACKEND=openai_compatible with OPENAI_COMPATIBLE_HOST",
    )?;
    let learning = open_learning(algorithms_dir)?;
    Ok(Pipeline::new(client, learning, ExtractionConfig::load())?)
}
