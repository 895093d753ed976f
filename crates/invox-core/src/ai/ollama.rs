//! Ollama backend implementation
//!
//! HTTP client for the Ollama generate API. Vision calls attach the page
//! image as base64 in the `images` array of the same endpoint.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{FinishReason, GenerateOptions, Generation};
use super::ModelBackend;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ollama backend
///
/// One instance per model; `with_model` produces a sibling sharing the
/// underlying HTTP client.
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            http_client: self.http_client.clone(),
            base_url: self.base_url.clone(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2-vision".to_string());
        Some(Self::new(&host, &model))
    }

    async fn send(&self, request: &OllamaRequest, timeout: Duration) -> Result<Generation> {
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Error::ModelTransport(format!(
                "Ollama returned HTTP {}",
                response.status()
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| Error::ModelFormat(format!("Invalid Ollama response body: {}", e)))?;

        debug!(
            model = %self.model,
            done_reason = ?ollama_response.done_reason,
            chars = ollama_response.response.len(),
            "Ollama response"
        );

        Ok(Generation {
            text: ollama_response.response,
            finish: FinishReason::from_wire(ollama_response.done_reason.as_deref()),
        })
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::ModelTransport("Request to Ollama timed out".into())
    } else {
        Error::ModelTransport(format!("Request to Ollama failed: {}", e))
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            images: Vec::new(),
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        self.send(&request, options.timeout).await
    }

    async fn generate_vision(
        &self,
        prompt: &str,
        image: &[u8],
        _mime_type: &str,
        options: &GenerateOptions,
    ) -> Result<Generation> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            images: vec![base64::engine::general_purpose::STANDARD.encode(image)],
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        self.send(&request, options.timeout).await
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(&self.base_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
