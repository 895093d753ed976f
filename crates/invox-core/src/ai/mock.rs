//! Mock backend for testing
//!
//! Returns queued responses without network access and counts calls, so
//! tests can assert how many model round-trips an extractor made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{GenerateOptions, Generation};
use super::ModelBackend;

/// Mock model backend
///
/// Responses are popped from per-channel queues; when a queue is empty the
/// mock falls back to an empty JSON payload. `fail_next_transport` makes
/// the next N calls (either channel) fail with a transport error, which is
/// how the retry paths are exercised.
#[derive(Clone)]
pub struct MockBackend {
    model: String,
    text_responses: Arc<Mutex<VecDeque<Generation>>>,
    vision_responses: Arc<Mutex<VecDeque<Generation>>>,
    transport_failures: Arc<AtomicUsize>,
    text_calls: Arc<AtomicUsize>,
    vision_calls: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock".to_string(),
            text_responses: Arc::new(Mutex::new(VecDeque::new())),
            vision_responses: Arc::new(Mutex::new(VecDeque::new())),
            transport_failures: Arc::new(AtomicUsize::new(0)),
            text_calls: Arc::new(AtomicUsize::new(0)),
            vision_calls: Arc::new(AtomicUsize::new(0)),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_model(&self, model: &str) -> Self {
        let mut clone = self.clone();
        clone.model = model.to_string();
        clone
    }

    /// Queue a response for the next text call
    pub fn push_text(&self, generation: Generation) {
        self.text_responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(generation);
    }

    /// Queue a response for the next vision call
    pub fn push_vision(&self, generation: Generation) {
        self.vision_responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(generation);
    }

    /// Make the next `n` calls fail with a transport error
    pub fn fail_next_transport(&self, n: usize) {
        self.transport_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of text generate calls made so far
    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    /// Number of vision generate calls made so far
    pub fn vision_calls(&self) -> usize {
        self.vision_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<Generation> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(Error::ModelTransport("Mock transport failure".into()));
        }
        Ok(self
            .text_responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Generation::stopped("[]")))
    }

    async fn generate_vision(
        &self,
        _prompt: &str,
        _image: &[u8],
        _mime_type: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(Error::ModelTransport("Mock transport failure".into()));
        }
        Ok(self
            .vision_responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Generation::stopped("{}")))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
