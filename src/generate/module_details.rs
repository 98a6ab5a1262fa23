//! `ModuleDetails` (§4.5): a parallel batch generating one detail page per
//! core module, each prompt built from the module's own file contents plus
//! its immediate dependency neighborhood, truncated to the model's input
//! budget by the LLM layer's own trimming step.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::action::Action;
use crate::batch::{BatchMode, BatchNodeBackend};
use crate::config::QualityConfig;
use crate::generate::prompts::MODULE_DETAIL_TEMPLATE;
use crate::generate::quality::generate_with_quality_loop;
use crate::llm::LlmClient;
use crate::node::{ExecutionContext, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::{DependencyGraph, ErrorKind, ErrorRecord, ModuleDescriptor};


pub struct GenerateModuleDetailsBatchNode {
    pub llm: Arc<LlmClient>,
    pub quality: QualityConfig,
    pub repo_name: String,
    pub local_repo_root: Option<PathBuf>,
}

#[derive(Clone)]
pub struct ModuleDetailItem {
    pub descriptor: ModuleDescriptor,
    pub neighbor_names: Vec<String>,
    pub target_language: String,
}

pub struct ModuleDetailOutput {
    pub module_name: String,
    pub content: String,
    pub quality_score: f64,
}

#[async_trait]
impl BatchNodeBackend<InMemoryStorage> for GenerateModuleDetailsBatchNode {
    type Item = ModuleDetailItem;
    type Output = ModuleDetailOutput;

    fn name(&self) -> &str {
        "generate_module_details"
    }

    async fn prep_items(&self, store: &Store<InMemoryStorage>) -> Result<Vec<ModuleDetailItem>, NodeError> {
        let modules: Vec<ModuleDescriptor> = store.get_or(keys::CORE_MODULES, Vec::new())?;
        let graph: DependencyGraph = store.get_or(keys::DEPENDENCIES, DependencyGraph::default())?;
        let target_language: String = store.get_or(keys::TARGET_LANGUAGE, "en".to_string())?;

        let items = modules
            .into_iter()
            .take(self.quality.max_modules_per_batch)
            .map(|descriptor| {
                let neighbor_names = neighbors_of(&descriptor.name, &graph);
                ModuleDetailItem {
                    descriptor,
                    neighbor_names,
                    target_language: target_language.clone(),
                }
            })
            .collect();
        Ok(items)
    }

    async fn exec_item(&self, item: &ModuleDetailItem, _ctx: &ExecutionContext) -> Result<ModuleDetailOutput, NodeError> {
        let module_source = self.read_module_source(&item.descriptor.path);
        let neighbors = if item.neighbor_names.is_empty() {
            "(no direct dependents or dependencies recorded)".to_string()
        } else {
            item.neighbor_names.join(", ")
        };

        let prompt = MODULE_DETAIL_TEMPLATE
            .replace("{module_name}", &item.descriptor.name)
            .replace("{repo_name}", &self.repo_name)
            .replace("{module_source}", &module_source)
            .replace("{neighbors}", &neighbors);

        let now = chrono::Utc::now().timestamp();
        let (content, report, _attempts) = generate_with_quality_loop(
            &self.llm,
            &prompt,
            "generate_content",
            &item.target_language,
            0,
            &[item.descriptor.name.clone()],
            &self.quality,
            self.llm.model_override_for_node(&item.descriptor.name),
            now,
        )
        .await
        .map_err(|e| NodeError::Exec {
            attempts: 1,
            message: e.to_string(),
        })?;

        Ok(ModuleDetailOutput {
            module_name: item.descriptor.name.clone(),
            content,
            quality_score: report.overall,
        })
    }

    async fn post_batch(
        &self,
        store: &mut Store<InMemoryStorage>,
        results: Vec<Result<ModuleDetailOutput, NodeError>>,
    ) -> Result<Action, NodeError> {
        for result in results {
            match result {
                Ok(output) => {
                    store.set_raw(
                        keys::module_detail(&output.module_name),
                        serde_json::Value::String(output.content),
                    )?;
                    store.put(&keys::quality_score(&format!("module_details.{}", output.module_name)), &output.quality_score)?;
                }
                Err(err) => {
                    store.push_error(ErrorRecord::new(self.name(), ErrorKind::Warning, err.to_string()))?;
                }
            }
        }
        Ok(Action::default_action())
    }

    fn mode(&self) -> BatchMode {
        BatchMode::Parallel { width: 8 }
    }

    fn fail_fast(&self) -> bool {
        false
    }
}

impl GenerateModuleDetailsBatchNode {
    fn read_module_source(&self, module_path: &str) -> String {
        let root = match &self.local_repo_root {
            Some(root) => root.clone(),
            None => return format!("(source unavailable for {module_path})"),
        };
        let candidate = root.join(module_path);
        std::fs::read_to_string(&candidate).unwrap_or_else(|_| format!("(could not read {module_path})"))
    }
}

fn neighbors_of(module_name: &str, graph: &DependencyGraph) -> Vec<String> {
    let Some(id) = graph.node_names.iter().position(|n| n == module_name) else {
        return Vec::new();
    };
    graph
        .edges
        .iter()
        .filter_map(|&(from, to)| {
            if from == id {
                Some(graph.node_names[to].clone())
            } else if to == id {
                Some(graph.node_names[from].clone())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbors_of_includes_both_directions() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("auth", "storage");
        graph.add_edge("api", "auth");
        let neighbors = neighbors_of("auth", &graph);
        assert!(neighbors.contains(&"storage".to_string()));
        assert!(neighbors.contains(&"api".to_string()));
    }
}
