//! Pluggable local model backend abstraction
//!
//! This module provides a backend-agnostic interface for text and vision
//! generation. All backends run locally (no cloud APIs) - Ollama,
//! OpenAI-compatible servers, etc.
//!
//! # Architecture
//!
//! - `ModelBackend` trait: defines the interface for all model operations
//! - `ModelClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OllamaBackend`, `OpenAICompatibleBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `INVOX_BACKEND`: Backend to use (ollama, openai_compatible, mock). Default: ollama
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Default model name (default: llama3.2-vision)
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required for openai_compatible backend)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: gpt-4o-mini)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)

mod mock;
mod ollama;
mod openai_compatible;
pub mod parsing;
pub mod repair;
pub mod types;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use types::*;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Trait defining the interface for all model backends
///
/// Backends must be Send + Sync to allow use across async tasks.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generate text from a prompt
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation>;

    /// Generate text from a prompt plus one image (vision models)
    async fn generate_vision(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
        options: &GenerateOptions,
    ) -> Result<Generation>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Get the model name (for logging)
    fn model(&self) -> &str;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;
}

/// Concrete model client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum ModelClient {
    /// Ollama backend (HTTP API)
    Ollama(OllamaBackend),
    /// OpenAI-compatible backend (Docker Model Runner, vLLM, LocalAI, llama-server, etc.)
    OpenAICompatible(OpenAICompatibleBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl ModelClient {
    /// Create a model client from environment variables
    ///
    /// Checks `INVOX_BACKEND` to determine which backend to use:
    /// - `ollama` (default): Uses OLLAMA_HOST and OLLAMA_MODEL
    /// - `openai_compatible`: Uses OPENAI_COMPATIBLE_HOST and OPENAI_COMPATIBLE_MODEL
    /// - `mock`: Creates a mock backend for testing
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("INVOX_BACKEND").unwrap_or_else(|_| "ollama".to_string());

        match backend.to_lowercase().as_str() {
            "ollama" => OllamaBackend::from_env().map(ModelClient::Ollama),
            "openai_compatible" | "openai" | "vllm" | "localai" | "llamacpp" => {
                OpenAICompatibleBackend::from_env().map(ModelClient::OpenAICompatible)
            }
            "mock" => Some(ModelClient::Mock(MockBackend::new())),
            _ => {
                warn!(backend = %backend, "Unknown INVOX_BACKEND, falling back to ollama");
                OllamaBackend::from_env().map(ModelClient::Ollama)
            }
        }
    }

    /// Create an Ollama backend directly
    pub fn ollama(host: &str, model: &str) -> Self {
        ModelClient::Ollama(OllamaBackend::new(host, model))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        ModelClient::Mock(MockBackend::new())
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        match self {
            ModelClient::Ollama(b) => ModelClient::Ollama(b.with_model(model)),
            ModelClient::OpenAICompatible(b) => {
                ModelClient::OpenAICompatible(b.with_model(model))
            }
            ModelClient::Mock(b) => ModelClient::Mock(b.with_model(model)),
        }
    }

    /// Generate with linear-backoff retries on transport errors
    ///
    /// Format errors are not retried; resending the same prompt after a
    /// malformed reply rarely helps, and the parsers have their own
    /// repair path. Delay before attempt N is `base_delay * N`.
    pub async fn generate_with_retry(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<Generation> {
        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = base_delay * attempt;
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying model call");
                tokio::time::sleep(delay).await;
            }

            match self.generate(prompt, options).await {
                Ok(generation) => return Ok(generation),
                Err(e @ Error::ModelTransport(_)) => {
                    warn!(attempt, error = %e, "Model call failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::ModelTransport("No attempts made".into())))
    }

    /// Vision variant of [`generate_with_retry`](Self::generate_with_retry)
    pub async fn generate_vision_with_retry(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
        options: &GenerateOptions,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<Generation> {
        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = base_delay * attempt;
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying vision call");
                tokio::time::sleep(delay).await;
            }

            match self.generate_vision(prompt, image, mime_type, options).await {
                Ok(generation) => return Ok(generation),
                Err(e @ Error::ModelTransport(_)) => {
                    warn!(attempt, error = %e, "Vision call failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::ModelTransport("No attempts made".into())))
    }
}

#[async_trait]
impl ModelBackend for ModelClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation> {
        match self {
            ModelClient::Ollama(b) => b.generate(prompt, options).await,
            ModelClient::OpenAICompatible(b) => b.generate(prompt, options).await,
            ModelClient::Mock(b) => b.generate(prompt, options).await,
        }
    }

    async fn generate_vision(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
        options: &GenerateOptions,
    ) -> Result<Generation> {
        match self {
            ModelClient::Ollama(b) => b.generate_vision(prompt, image, mime_type, options).await,
            ModelClient::OpenAICompatible(b) => {
                b.generate_vision(prompt, image, mime_type, options).await
            }
            ModelClient::Mock(b) => b.generate_vision(prompt, image, mime_type, options).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            ModelClient::Ollama(b) => b.health_check().await,
            ModelClient::OpenAICompatible(b) => b.health_check().await,
            ModelClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            ModelClient::Ollama(b) => b.model(),
            ModelClient::OpenAICompatible(b) => b.model(),
            ModelClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            ModelClient::Ollama(b) => b.host(),
            ModelClient::OpenAICompatible(b) => b.host(),
            ModelClient::Mock(b) => b.host(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_client_mock() {
        let client = ModelClient::mock();
        assert_eq!(client.model(), "mock");
        assert_eq!(client.host(), "mock://localhost");
    }

    #[tokio::test]
    async fn test_mock_health_check() {
        let client = ModelClient::mock();
        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transport_failures() {
        let mock = MockBackend::new();
        mock.fail_next_transport(2);
        mock.push_text(Generation::stopped("[]"));
        let client = ModelClient::Mock(mock.clone());

        let generation = client
            .generate_with_retry(
                "x",
                &GenerateOptions::default(),
                2,
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        assert_eq!(generation.text, "[]");
        assert_eq!(mock.text_calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max() {
        let mock = MockBackend::new();
        mock.fail_next_transport(10);
        let client = ModelClient::Mock(mock.clone());

        let result = client
            .generate_with_retry(
                "x",
                &GenerateOptions::default(),
                2,
                Duration::from_millis(1),
            )
            .await;
        assert!(matches!(result, Err(Error::ModelTransport(_))));
        assert_eq!(mock.text_calls(), 3);
    }
}
