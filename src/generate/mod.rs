//! Content generation pipeline (§4.5): seven independent generators —
//! six whole-document sections run in one parallel batch, plus a
//! per-module batch — each closed over by a `ContentQualityCheck`
//! regenerate loop.

pub mod module_details;
pub mod prompts;
pub mod quality;

use async_trait::async_trait;
use std::sync::Arc;

use crate::action::Action;
use crate::batch::{BatchMode, BatchNodeBackend};
use crate::config::{Config, QualityConfig};
use crate::flow::{BasicFlow, FlowBuilder};
use crate::llm::LlmClient;
use crate::node::{ExecutionContext, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::{CommitRecord, DependencyGraph, ErrorKind, ErrorRecord, FileEntry, ModuleDescriptor};

use module_details::GenerateModuleDetailsBatchNode;
use prompts::{GeneratorSpec, PromptStore};
use quality::generate_with_quality_loop;

pub struct GenerateSectionsBatchNode {
    pub llm: Arc<LlmClient>,
    pub quality: QualityConfig,
    pub repo_name: String,
    pub prompts: PromptStore,
}

/// A self-contained unit of work: everything `exec_item` needs, gathered
/// from the blackboard during `prep_items` so `exec_item` never has to read
/// shared state mid-flight.
#[derive(Clone)]
pub struct SectionItem {
    spec: GeneratorSpec,
    context: String,
    known_terms: Vec<String>,
    target_language: String,
}

pub struct SectionOutput {
    pub section: String,
    pub content: String,
    pub quality_score: f64,
}

/// Builds each generator's context string from whatever inputs its section
/// declares it needs (§4.5's table): `code_structure`/`core_modules` for
/// structural sections, the commit history summary for history-driven ones.
fn build_context(store: &Store<InMemoryStorage>, section: &str) -> String {
    let core_modules: Vec<ModuleDescriptor> = store.get_or(keys::CORE_MODULES, Vec::new()).unwrap_or_default();
    let module_summaries: Vec<String> = core_modules
        .iter()
        .map(|m| format!("- {} ({}): {}", m.name, m.path, m.description))
        .collect();

    let mut sections = Vec::new();
    if matches!(section, "overall_architecture" | "api_docs" | "dependency" | "glossary" | "quick_look") {
        let structure: Vec<FileEntry> = store.get_or(keys::CODE_STRUCTURE, Vec::new()).unwrap_or_default();
        sections.push(format!(
            "Files ({}): {}",
            structure.len(),
            structure.iter().map(|f| f.path.as_str()).take(80).collect::<Vec<_>>().join(", ")
        ));
        sections.push(format!("Core modules:\n{}", module_summaries.join("\n")));
    }
    if section == "dependency" {
        let graph: DependencyGraph = store.get_or(keys::DEPENDENCIES, DependencyGraph::default()).unwrap_or_default();
        sections.push(format!("Dependency edges: {:?}", graph.edges));
    }
    if matches!(section, "overall_architecture" | "timeline" | "glossary" | "quick_look") {
        if let Ok(Some(summary)) = store.get_raw(crate::repo::history::HISTORY_SUMMARY_KEY) {
            sections.push(format!("History summary: {summary}"));
        }
        let commits: Vec<CommitRecord> = store.get_or(keys::COMMIT_HISTORY, Vec::new()).unwrap_or_default();
        sections.push(format!("Commits analyzed: {}", commits.len()));
    }
    sections.join("\n\n")
}

#[async_trait]
impl BatchNodeBackend<InMemoryStorage> for GenerateSectionsBatchNode {
    type Item = SectionItem;
    type Output = SectionOutput;

    fn name(&self) -> &str {
        "generate_sections"
    }

    async fn prep_items(&self, store: &Store<InMemoryStorage>) -> Result<Vec<SectionItem>, NodeError> {
        let known_terms: Vec<String> = store
            .get_or::<Vec<ModuleDescriptor>>(keys::CORE_MODULES, Vec::new())?
            .into_iter()
            .map(|m| m.name)
            .collect();
        let target_language: String = store.get_or(keys::TARGET_LANGUAGE, "en".to_string())?;

        Ok(self
            .prompts
            .all()
            .into_iter()
            .map(|spec| {
                let context = build_context(store, spec.section);
                SectionItem {
                    spec,
                    context,
                    known_terms: known_terms.clone(),
                    target_language: target_language.clone(),
                }
            })
            .collect())
    }

    async fn exec_item(&self, item: &SectionItem, _ctx: &ExecutionContext) -> Result<SectionOutput, NodeError> {
        let prompt = item.spec.render(&self.repo_name, &item.context);
        let now = chrono::Utc::now().timestamp();
        let (content, report, _attempts) = generate_with_quality_loop(
            &self.llm,
            &prompt,
            "generate_content",
            &item.target_language,
            item.spec.required_diagrams,
            &item.known_terms,
            &self.quality,
            self.llm.model_override_for_node(item.spec.section),
            now,
        )
        .await
        .map_err(|e| NodeError::Exec {
            attempts: 1,
            message: e.to_string(),
        })?;

        Ok(SectionOutput {
            section: item.spec.section.to_string(),
            content,
            quality_score: report.overall,
        })
    }

    async fn post_batch(
        &self,
        store: &mut Store<InMemoryStorage>,
        results: Vec<Result<SectionOutput, NodeError>>,
    ) -> Result<Action, NodeError> {
        for result in results {
            match result {
                Ok(output) => {
                    store.set_raw(keys::generated_content(&output.section), serde_json::Value::String(output.content))?;
                    store.put(&keys::quality_score(&output.section), &output.quality_score)?;
                }
                Err(err) => {
                    store.push_error(ErrorRecord::new(self.name(), ErrorKind::Warning, err.to_string()))?;
                }
            }
        }
        Ok(Action::default_action())
    }

    fn mode(&self) -> BatchMode {
        BatchMode::Parallel { width: 6 }
    }

    fn fail_fast(&self) -> bool {
        false
    }
}

/// Wires the six section generators, then the module-details batch: sections
/// only need repo-analysis artifacts, and placing module detail pages after
/// them keeps `Combine`'s reading order overview-first.
pub fn build_generate_content_flow(
    config: &Config,
    llm: Arc<LlmClient>,
    repo_name: &str,
    local_repo_root: Option<std::path::PathBuf>,
) -> BasicFlow<InMemoryStorage> {
    FlowBuilder::new("generate_content")
        .node(
            "generate_sections",
            crate::batch::BatchNode::new(GenerateSectionsBatchNode {
                llm: llm.clone(),
                quality: config.quality.clone(),
                repo_name: repo_name.to_string(),
                prompts: PromptStore::default(),
            }),
        )
        .node(
            "generate_module_details",
            crate::batch::BatchNode::new(GenerateModuleDetailsBatchNode {
                llm,
                quality: config.quality.clone(),
                repo_name: repo_name.to_string(),
                local_repo_root,
            }),
        )
        .edge("generate_sections", "default", "generate_module_details")
        .start("generate_sections")
        .terminal_action("default")
        .max_steps(4)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_includes_module_summaries_for_structural_sections() {
        let mut store = Store::default();
        store
            .put(
                keys::CORE_MODULES,
                &vec![ModuleDescriptor {
                    name: "auth".to_string(),
                    path: "src/auth".to_string(),
                    description: "Handles login".to_string(),
                    importance: 8,
                    depends_on: vec![],
                }],
            )
            .unwrap();
        let context = build_context(&store, "api_docs");
        assert!(context.contains("auth"));
    }

    #[test]
    fn dependency_context_includes_edges_only_for_dependency_section() {
        let mut store = Store::default();
        let mut graph = DependencyGraph::default();
        graph.add_edge("a", "b");
        store.put(keys::DEPENDENCIES, &graph).unwrap();
        assert!(build_context(&store, "dependency").contains("Dependency edges"));
        assert!(!build_context(&store, "quick_look").contains("Dependency edges"));
    }
}
