//! Error types for invox

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// OCR ran but produced no usable text. Fatal on the last fallback tier.
    #[error("no text detected in image")]
    NoTextDetected,

    /// Both the PDF text layer and the page-image OCR fallback came up empty.
    #[error("PDF text extraction failed: {0}")]
    PdfExtraction(String),

    /// Network-level failure talking to a model service. Retried, then the
    /// cascade moves to the next tier.
    #[error("model transport error: {0}")]
    ModelTransport(String),

    /// Model responded but the payload could not be parsed or repaired.
    #[error("malformed model output: {0}")]
    ModelFormat(String),

    /// Training-session failure (abandoned session, unusable annotations).
    #[error("training error: {0}")]
    Training(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
