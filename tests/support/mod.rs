//! Shared end-to-end test support: a stubbed `LlmProvider` so scenario
//! tests never touch the network, plus small repo-fixture helpers.

use async_trait::async_trait;
use repo_atlas::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use repo_atlas::llm::LlmClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use repo_atlas::config::{Config, LlmConfig};
use repo_atlas::error::LlmError;

/// Returns the same canned response for every call, tracking the call
/// count and the peak number of calls in flight at once (for the
/// concurrency-cap scenario).
pub struct StubProvider {
    pub response_text: String,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub delay: Duration,
}

impl StubProvider {
    pub fn new(response_text: impl Into<String>) -> Self {
        Self {
            response_text: response_text.into(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::from_millis(15),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionResponse {
            text: self.response_text.clone(),
            output_tokens: 32,
        })
    }
}

/// Builds a `Config` wired to route every model through the `stub/` prefix,
/// and an `LlmClient` with `stub` registered to `provider`.
pub fn stub_llm_client(config: &mut Config, max_concurrent_llm_calls: usize, provider: Arc<StubProvider>) -> Arc<LlmClient> {
    config.llm = LlmConfig {
        default_model: "stub/test-model".to_string(),
        base_url: "http://localhost".to_string(),
        token_budget: 8192,
        circuit_breaker_threshold: 0.5,
        temperature_by_task: HashMap::new(),
        model_overrides: HashMap::new(),
        model_by_task: HashMap::new(),
    };
    let dir = tempfile::tempdir().unwrap();
    let client = LlmClient::new(config.llm.clone(), dir.path(), "test-key".to_string(), max_concurrent_llm_calls);
    Arc::new(client.with_provider("stub", provider))
}

/// Creates a one-file local repository fixture under a fresh temp directory
/// and returns its path, suitable for `repo_source` as a `file://` URL.
pub fn single_file_repo_fixture(file_name: &str, content: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(file_name), content).unwrap();
    dir
}
