//! S3 (§8): an invalid Mermaid block is flagged, repaired when the model's
//! retry fixes it, and left in place with a warning finding when it doesn't.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use repo_atlas::config::Config;
use repo_atlas::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use repo_atlas::llm::LlmClient;
use repo_atlas::mermaid::MermaidValidationNode;
use repo_atlas::node::Node;
use repo_atlas::store::{keys, Store};

const BAD_CHART: &str = "graph TD\nA[foo(bar)] --> B\n";
const GOOD_CHART: &str = "graph TD\nA[foo bar] --> B\n";

struct RepairingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for RepairingProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, repo_atlas::error::LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionResponse {
            text: format!("```mermaid\n{GOOD_CHART}```"),
            output_tokens: 10,
        })
    }
}

struct StubbornProvider;

#[async_trait]
impl LlmProvider for StubbornProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, repo_atlas::error::LlmError> {
        Ok(CompletionResponse {
            text: format!("```mermaid\n{BAD_CHART}```"),
            output_tokens: 10,
        })
    }
}

fn document_with_bad_chart() -> String {
    format!("# Architecture\n\nIntro text.\n\n```mermaid\n{BAD_CHART}```\n\nOutro.\n")
}

#[tokio::test]
async fn regeneration_repairs_an_invalid_chart() {
    let mut config = Config::defaults();
    config.llm.default_model = "stub/test-model".to_string();
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(
        LlmClient::new(config.llm.clone(), dir.path(), "test-key".to_string(), 1)
            .with_provider("stub", Arc::new(RepairingProvider { calls: AtomicUsize::new(0) })),
    );

    let mut store: Store<repo_atlas::storage::InMemoryStorage> = Store::default();
    store
        .set_raw(keys::generated_content("overall_architecture"), serde_json::Value::String(document_with_bad_chart()))
        .unwrap();

    let node = Node::new(MermaidValidationNode {
        llm,
        mermaid: config.mermaid.clone(),
    });
    node.run(&mut store).await.unwrap();

    let document: String = match store.get_raw(&keys::generated_content("overall_architecture")).unwrap() {
        Some(serde_json::Value::String(s)) => s,
        _ => panic!("expected the document to still be a string"),
    };
    assert!(document.contains("foo bar"), "expected the repaired chart body, got:\n{document}");
    assert!(!document.contains("foo(bar)"));

    let findings: Vec<repo_atlas::types::ValidationFinding> = store.get(keys::MERMAID_REPORT).unwrap().unwrap_or_default();
    assert!(findings.is_empty());
}

#[tokio::test]
async fn exhausted_regeneration_keeps_the_original_and_records_a_warning() {
    let mut config = Config::defaults();
    config.llm.default_model = "stub/test-model".to_string();
    config.mermaid.max_regeneration_attempts = 2;
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(
        LlmClient::new(config.llm.clone(), dir.path(), "test-key".to_string(), 1).with_provider("stub", Arc::new(StubbornProvider)),
    );

    let mut store: Store<repo_atlas::storage::InMemoryStorage> = Store::default();
    store
        .set_raw(keys::generated_content("overall_architecture"), serde_json::Value::String(document_with_bad_chart()))
        .unwrap();

    let node = Node::new(MermaidValidationNode {
        llm,
        mermaid: config.mermaid.clone(),
    });
    node.run(&mut store).await.unwrap();

    let findings: Vec<repo_atlas::types::ValidationFinding> = store.get(keys::MERMAID_REPORT).unwrap().unwrap_or_default();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, repo_atlas::types::Severity::Warning);

    let document: String = match store.get_raw(&keys::generated_content("overall_architecture")).unwrap() {
        Some(serde_json::Value::String(s)) => s,
        _ => panic!("expected the document to still be a string"),
    };
    assert!(document.contains("foo(bar)"), "expected the original invalid chart retained, got:\n{document}");
}
