//! Mermaid Validation Engine (§4.6): scans every generated document for
//! fenced Mermaid blocks, validates each, repairs what it can, and replaces
//! bodies in place. Runs as a single ordinary node — the per-document work
//! is cheap and I/O-bound on the LLM call, not CPU-bound, so a plain
//! sequential pass over documents is enough without a batch fan-out.

pub mod extract;
pub mod regenerate;
pub mod validate;

use async_trait::async_trait;
use std::sync::Arc;

use crate::action::Action;
use crate::config::MermaidConfig;
use crate::generate::prompts::PromptStore;
use crate::llm::LlmClient;
use crate::node::{ExecutionContext, NodeBackend, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::{ErrorKind, ErrorRecord, ModuleDescriptor, ValidationFinding};

use extract::{extract_blocks, substitute_block};
use regenerate::validate_and_repair;
use validate::NoRenderer;

pub struct MermaidValidationNode {
    pub llm: Arc<LlmClient>,
    pub mermaid: MermaidConfig,
}

/// One blackboard entry to scan: its key, current text, and a label used in
/// `ValidationFinding::document_path`.
struct DocumentEntry {
    key: String,
    label: String,
    text: String,
}

pub struct MermaidPrep {
    entries: Vec<DocumentEntry>,
    target_language: String,
}

#[async_trait]
impl NodeBackend<InMemoryStorage> for MermaidValidationNode {
    type Prep = MermaidPrep;
    type Exec = (Vec<(String, String)>, Vec<ValidationFinding>);

    fn name(&self) -> &str {
        "mermaid_validation"
    }

    async fn prep(&self, store: &Store<InMemoryStorage>) -> Result<Self::Prep, NodeError> {
        let mut entries = Vec::new();

        for spec in PromptStore::default().all() {
            let key = keys::generated_content(spec.section);
            if let Some(text) = read_text(store, &key)? {
                entries.push(DocumentEntry {
                    key,
                    label: spec.section.to_string(),
                    text,
                });
            }
        }

        let modules: Vec<ModuleDescriptor> = store.get_or(keys::CORE_MODULES, Vec::new())?;
        for module in modules {
            let key = keys::module_detail(&module.name);
            if let Some(text) = read_text(store, &key)? {
                entries.push(DocumentEntry {
                    key,
                    label: format!("module_details.{}", module.name),
                    text,
                });
            }
        }

        let target_language = store.get_or(keys::TARGET_LANGUAGE, "en".to_string())?;
        Ok(MermaidPrep { entries, target_language })
    }

    async fn exec(&self, prep: &Self::Prep, _ctx: &ExecutionContext) -> Result<Self::Exec, NodeError> {
        let renderer = NoRenderer;
        let now = chrono::Utc::now().timestamp();
        let model_override = self.llm.model_override_for_node(self.name());
        let mut updated_docs = Vec::new();
        let mut findings = Vec::new();

        for entry in &prep.entries {
            let blocks = extract_blocks(&entry.text);
            if blocks.is_empty() {
                continue;
            }

            let mut document = entry.text.clone();
            for block in blocks.into_iter().rev() {
                let result = validate_and_repair(
                    &entry.label,
                    block.index,
                    &block.text,
                    &self.llm,
                    &renderer,
                    &self.mermaid,
                    &prep.target_language,
                    model_override.clone(),
                    now,
                )
                .await
                .map_err(|e| NodeError::Exec {
                    attempts: 1,
                    message: e.to_string(),
                })?;

                document = substitute_block(&document, block.byte_range, &result.chart_text);
                if let Some(finding) = result.finding {
                    findings.push(finding);
                }
            }

            updated_docs.push((entry.key.clone(), document));
        }

        Ok((updated_docs, findings))
    }

    async fn post(&self, store: &mut Store<InMemoryStorage>, _prep: Self::Prep, exec: Self::Exec) -> Result<Action, NodeError> {
        let (updated_docs, findings) = exec;

        for (key, document) in updated_docs {
            store.set_raw(key, serde_json::Value::String(document))?;
        }

        for finding in &findings {
            store.push_error(ErrorRecord::new(
                self.name(),
                ErrorKind::Warning,
                format!("mermaid chart {} in {} left invalid: {}", finding.chart_index, finding.document_path, finding.error_message),
            ))?;
        }

        store.put(keys::MERMAID_REPORT, &findings)?;
        Ok(Action::default_action())
    }
}

fn read_text(store: &Store<InMemoryStorage>, key: &str) -> Result<Option<String>, NodeError> {
    match store.get_raw(key)? {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(_) | None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_llm_client() -> Arc<LlmClient> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(LlmClient::new(Config::defaults().llm, dir.path(), "test-key".to_string(), 1))
    }

    #[tokio::test]
    async fn prep_collects_section_and_module_documents_that_exist() {
        let mut store = Store::default();
        store
            .set_raw(keys::generated_content("overall_architecture"), serde_json::Value::String("graph TD\nA-->B".to_string()))
            .unwrap();
        store
            .put(
                keys::CORE_MODULES,
                &vec![ModuleDescriptor {
                    name: "auth".to_string(),
                    path: "src/auth".to_string(),
                    description: "auth module".to_string(),
                    importance: 5,
                    depends_on: vec![],
                }],
            )
            .unwrap();
        store
            .set_raw(keys::module_detail("auth"), serde_json::Value::String("# Auth\nno diagrams here".to_string()))
            .unwrap();

        let node = MermaidValidationNode {
            llm: test_llm_client(),
            mermaid: MermaidConfig::default(),
        };
        let prep = node.prep(&store).await.unwrap();
        assert_eq!(prep.entries.len(), 2);
        assert!(prep.entries.iter().any(|e| e.label == "overall_architecture"));
        assert!(prep.entries.iter().any(|e| e.label == "module_details.auth"));
    }

    #[tokio::test]
    async fn exec_leaves_documents_without_mermaid_blocks_untouched() {
        let node = MermaidValidationNode {
            llm: test_llm_client(),
            mermaid: MermaidConfig::default(),
        };
        let prep = MermaidPrep {
            entries: vec![DocumentEntry {
                key: keys::generated_content("glossary"),
                label: "glossary".to_string(),
                text: "Plain prose with no charts.".to_string(),
            }],
            target_language: "en".to_string(),
        };
        let (updated, findings) = node.exec(&prep, &ExecutionContext::default()).await.unwrap();
        assert!(updated.is_empty());
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn exec_substitutes_a_valid_chart_without_findings() {
        let node = MermaidValidationNode {
            llm: test_llm_client(),
            mermaid: MermaidConfig::default(),
        };
        let doc = "intro\n```mermaid\ngraph TD\nA-->B\n```\noutro".to_string();
        let prep = MermaidPrep {
            entries: vec![DocumentEntry {
                key: keys::generated_content("overall_architecture"),
                label: "overall_architecture".to_string(),
                text: doc,
            }],
            target_language: "en".to_string(),
        };
        let (updated, findings) = node.exec(&prep, &ExecutionContext::default()).await.unwrap();
        assert_eq!(updated.len(), 1);
        assert!(findings.is_empty());
        assert!(updated[0].1.contains("A-->B"));
    }

    /// §8's Mermaid idempotence invariant: validating an already-valid
    /// document a second time changes nothing and raises no findings.
    #[tokio::test]
    async fn running_validation_twice_on_a_valid_document_is_a_no_op() {
        let node = MermaidValidationNode {
            llm: test_llm_client(),
            mermaid: MermaidConfig::default(),
        };
        let doc = "intro\n```mermaid\ngraph TD\nA-->B\n```\noutro".to_string();
        let first_prep = MermaidPrep {
            entries: vec![DocumentEntry {
                key: keys::generated_content("overall_architecture"),
                label: "overall_architecture".to_string(),
                text: doc,
            }],
            target_language: "en".to_string(),
        };
        let (first_pass, first_findings) = node.exec(&first_prep, &ExecutionContext::default()).await.unwrap();
        assert!(first_findings.is_empty());

        let second_prep = MermaidPrep {
            entries: vec![DocumentEntry {
                key: keys::generated_content("overall_architecture"),
                label: "overall_architecture".to_string(),
                text: first_pass[0].1.clone(),
            }],
            target_language: "en".to_string(),
        };
        let (second_pass, second_findings) = node.exec(&second_prep, &ExecutionContext::default()).await.unwrap();
        assert!(second_findings.is_empty());
        assert_eq!(first_pass[0].1, second_pass[0].1);
    }
}
