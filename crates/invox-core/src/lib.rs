//! Invox Core Library
//!
//! Shared functionality for the Invox invoice extraction tool:
//! - Text and image acquisition (PDF text layer, embedded images, OCR)
//! - Strategy cascade: learned algorithms, supplier profiles, text AI, vision
//! - Per-supplier learning with persisted regex algorithms
//! - Pluggable local model backends (Ollama, OpenAI-compatible)
//! - Prompt library for customizable model prompts
//! - Single-source money math for tax and discount totals
//! - Catalog product matching for extracted line items

pub mod acquire;
pub mod ai;
pub mod config;
pub mod error;
pub mod extract;
pub mod learn;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod profiles;
pub mod prompts;
pub mod tax;

pub use ai::{
    FinishReason, GenerateOptions, Generation, MockBackend, ModelBackend, ModelClient,
    OllamaBackend, OpenAICompatibleBackend,
};
pub use config::ExtractionConfig;
pub use error::{Error, Result};
pub use learn::{
    normalize_supplier_key, AlgorithmStore, FileStore, LearningManager, MemoryStore,
};
pub use matcher::{Catalog, MemoryCatalog, ProductMatcher};
pub use models::{
    AlgorithmPatterns, AnnotatedItem, CatalogItem, ExtractionMethod, ExtractionResult, FileType,
    InvoiceDocument, InvoiceMetadata, LearnedAlgorithm, LineItem, ProcessOutcome, ProcessingRules,
    ProductMatch, ProductSuggestions, TrainingAnnotations, TrainingReport, TrainingSession,
};
pub use pipeline::Pipeline;
pub use profiles::{BuiltinProfiles, SupplierProfile};
pub use prompts::{Prompt, PromptId, PromptLibrary};
pub use tax::LineTotals;
