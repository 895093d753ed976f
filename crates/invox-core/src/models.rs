//! Shared data model for the extraction pipeline
//!
//! Everything a strategy produces funnels into [`ExtractionResult`] so the
//! orchestrator can return one shape regardless of which tier succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tax::LineTotals;

/// One uploaded invoice file. Ephemeral; created per upload and discarded
/// after extraction.
#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub file_name: String,
    pub file_type: FileType,
    pub bytes: Vec<u8>,
    /// Caller-supplied supplier name, used to skip detection when known.
    pub supplier_hint: Option<String>,
}

impl InvoiceDocument {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let file_type = FileType::from_name(&file_name);
        Self {
            file_name,
            file_type,
            bytes,
            supplier_hint: None,
        }
    }

    pub fn with_supplier_hint(mut self, supplier: impl Into<String>) -> Self {
        self.supplier_hint = Some(supplier.into());
        self
    }

    /// Declared mime type for vision requests.
    pub fn mime_type(&self) -> &'static str {
        match self.file_type {
            FileType::Pdf => "application/pdf",
            FileType::Png => "image/png",
            FileType::Jpeg => "image/jpeg",
            FileType::Other => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Png,
    Jpeg,
    Other,
}

impl FileType {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".pdf") {
            FileType::Pdf
        } else if lower.ends_with(".png") {
            FileType::Png
        } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            FileType::Jpeg
        } else {
            FileType::Other
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, FileType::Pdf)
    }
}

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    Vision,
    VisionSimple,
    TextPattern,
    TextAi,
    LearnedAlgorithm,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::VisionSimple => "vision-simple",
            Self::TextPattern => "text-pattern",
            Self::TextAi => "text-ai",
            Self::LearnedAlgorithm => "learned-algorithm",
        }
    }
}

/// Header-level fields read off the invoice, used for cross-validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceMetadata {
    pub invoice_number: Option<String>,
    pub date: Option<String>,
    pub total_amount: Option<f64>,
    pub total_excluding_tax: Option<f64>,
    pub tax_amount: Option<f64>,
    pub currency: Option<String>,
}

/// One extracted invoice row.
///
/// The computed monetary fields are always derivable from `quantity`,
/// `unit_price_excl_tax`, `discount_percent` and the tax rate via
/// [`crate::tax::line_totals`]; nothing else writes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub code: Option<String>,
    pub description: String,
    pub quantity: f64,
    pub unit_price_excl_tax: f64,
    pub discount_percent: f64,
    #[serde(flatten)]
    pub totals: LineTotals,
    /// Value printed on the invoice. Cross-validation only, never arithmetic.
    pub total_price_as_reported: Option<f64>,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
    /// Provenance tag (profile code, "vision", "text-ai", ...).
    pub source: String,
    /// Catalog suggestions, filled by the orchestrator when a catalog is
    /// wired in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<ProductSuggestions>,
}

impl LineItem {
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.validation_errors.push(warning.into());
    }
}

/// Output of any extraction strategy.
///
/// `line_items` may be empty but `method` and `supplier` are always set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub method: ExtractionMethod,
    pub supplier: String,
    pub metadata: InvoiceMetadata,
    pub line_items: Vec<LineItem>,
    /// Diagnostic text (raw model output, matched pattern names).
    pub raw_trace: String,
}

/// What the orchestrator hands back: either line items, or a request to run
/// the training flow for a first-time supplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Extracted(Box<ExtractionResult>),
    NeedsTraining { supplier: String, raw_text: String },
}

impl ProcessOutcome {
    pub fn needs_training(&self) -> bool {
        matches!(self, ProcessOutcome::NeedsTraining { .. })
    }
}

/// Regex patterns of a learned algorithm, stored as plain strings so the
/// whole object is serializable; compiled lazily at apply time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmPatterns {
    /// Line-item regex with named capture groups.
    pub line_item: String,
    /// Line-item field ("code", "description", "quantity", "unit_price",
    /// "discount", "total") → capture-group name in `line_item`. A missing
    /// entry means the group carries the field's own name.
    pub groups: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Numeric post-processing rules attached to a learned algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRules {
    pub currency: String,
    pub tax_rate: f64,
    pub prices_include_tax: bool,
    pub has_discounts: bool,
    #[serde(default)]
    pub date_format: Option<String>,
}

/// Persisted per-supplier extraction rules produced by a training session.
///
/// Created once on first successful training, may be retrained (overwritten),
/// never auto-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedAlgorithm {
    pub supplier_key: String,
    pub supplier_name: String,
    pub patterns: AlgorithmPatterns,
    pub processing: ProcessingRules,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub training_count: u32,
}

/// One user-annotated example row supplied during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedItem {
    pub code: Option<String>,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub discount_percent: f64,
    #[serde(default)]
    pub total_price: Option<f64>,
}

/// Everything the user provides in one training pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingAnnotations {
    pub items: Vec<AnnotatedItem>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub currency: Option<String>,
    pub tax_rate: Option<f64>,
    pub prices_include_tax: bool,
}

/// Transient state for one training interaction. Discarded once the
/// algorithm is persisted or the session is abandoned.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub supplier: String,
    pub supplier_key: String,
    pub raw_invoice_text: String,
    pub started_at: DateTime<Utc>,
}

/// Informational accuracy report for a freshly trained algorithm.
/// Never blocks persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub supplier: String,
    pub matched_lines: usize,
    pub annotated_examples: usize,
    pub examples_reproduced: usize,
    pub used_manual_template: bool,
}

/// One item in the external product catalog (read-only collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A ranked catalog suggestion for an extracted line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMatch {
    pub item: CatalogItem,
    pub score: f64,
}

/// Best match plus alternates offered for manual override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductSuggestions {
    pub best: Option<ProductMatch>,
    pub alternates: Vec<ProductMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_name() {
        assert_eq!(FileType::from_name("invoice.PDF"), FileType::Pdf);
        assert_eq!(FileType::from_name("scan.jpeg"), FileType::Jpeg);
        assert_eq!(FileType::from_name("scan.jpg"), FileType::Jpeg);
        assert_eq!(FileType::from_name("scan.png"), FileType::Png);
        assert_eq!(FileType::from_name("notes.txt"), FileType::Other);
    }

    #[test]
    fn test_extraction_method_serialization() {
        let json = serde_json::to_string(&ExtractionMethod::LearnedAlgorithm).unwrap();
        assert_eq!(json, "\"learned-algorithm\"");
        let back: ExtractionMethod = serde_json::from_str("\"vision-simple\"").unwrap();
        assert_eq!(back, ExtractionMethod::VisionSimple);
    }

    #[test]
    fn test_learned_algorithm_roundtrip() {
        let alg = LearnedAlgorithm {
            supplier_key: "medisptyltd".into(),
            supplier_name: "MEDIS (PTY) LTD".into(),
            patterns: AlgorithmPatterns {
                line_item: r"^(?P<code>\S+)\s+(?P<description>.+)$".into(),
                groups: [("code".to_string(), "code".to_string())].into_iter().collect(),
                invoice_number: Some(r"INV-\d+".into()),
                date: None,
            },
            processing: ProcessingRules {
                currency: "ZAR".into(),
                tax_rate: 15.0,
                prices_include_tax: false,
                has_discounts: true,
                date_format: None,
            },
            version: 1,
            created_at: Utc::now(),
            training_count: 1,
        };

        let json = serde_json::to_string(&alg).unwrap();
        let back: LearnedAlgorithm = serde_json::from_str(&json).unwrap();
        assert_eq!(back.supplier_key, "medisptyltd");
        assert_eq!(back.patterns.invoice_number.as_deref(), Some(r"INV-\d+"));
        assert_eq!(back.processing.tax_rate, 15.0);
    }
}
