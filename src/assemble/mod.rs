//! Assembly stage (§4.7): Combine builds the cross-linked file tree, Format
//! applies the final cosmetic pass and writes files atomically.

pub mod combine;
pub mod format;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::action::Action;
use crate::node::{ExecutionContext, NodeBackend, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::ModuleDescriptor;

use combine::{build_file_tree, SECTION_FILES};
use format::format_and_write;

pub struct AssembleDocumentsNode {
    pub output_dir: PathBuf,
}

pub struct AssemblePrep {
    repo_name: String,
    section_contents: BTreeMap<&'static str, String>,
    module_contents: Vec<(String, String)>,
    module_names: Vec<String>,
}

#[async_trait]
impl NodeBackend<InMemoryStorage> for AssembleDocumentsNode {
    type Prep = AssemblePrep;
    type Exec = Vec<combine::TreeFile>;

    fn name(&self) -> &str {
        "assemble_documents"
    }

    async fn prep(&self, store: &Store<InMemoryStorage>) -> Result<Self::Prep, NodeError> {
        let repo_name = store.get_or(keys::REPO_SOURCE, "repository".to_string())?;

        let mut section_contents = BTreeMap::new();
        for (section, _) in SECTION_FILES {
            if let Some(serde_json::Value::String(text)) = store.get_raw(&keys::generated_content(section))? {
                section_contents.insert(section, text);
            }
        }

        let modules: Vec<ModuleDescriptor> = store.get_or(keys::CORE_MODULES, Vec::new())?;
        let module_names: Vec<String> = modules.iter().map(|m| m.name.clone()).collect();
        let mut module_contents = Vec::new();
        for module in &modules {
            if let Some(serde_json::Value::String(text)) = store.get_raw(&keys::module_detail(&module.name))? {
                module_contents.push((module.name.clone(), text));
            }
        }

        Ok(AssemblePrep {
            repo_name: repo_name_to_dir(&repo_name),
            section_contents,
            module_contents,
            module_names,
        })
    }

    async fn exec(&self, prep: &Self::Prep, _ctx: &ExecutionContext) -> Result<Self::Exec, NodeError> {
        Ok(build_file_tree(&prep.section_contents, &prep.module_contents, &prep.module_names))
    }

    async fn post(&self, store: &mut Store<InMemoryStorage>, prep: Self::Prep, exec: Self::Exec) -> Result<Action, NodeError> {
        let repo_root = self.output_dir.join(&prep.repo_name);
        let written = format_and_write(&repo_root, &exec).map_err(|e| NodeError::Post(e.to_string()))?;

        store.put(keys::FINAL_DOCUMENTS, &written)?;
        Ok(Action::default_action())
    }
}

fn repo_name_to_dir(repo_source: &str) -> String {
    let trimmed = repo_source.trim_end_matches('/').trim_end_matches(".git");
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModuleDescriptor;

    #[tokio::test]
    async fn prep_collects_existing_sections_and_module_details() {
        let mut store = Store::default();
        store.put(keys::REPO_SOURCE, &"https://example.com/acme/widget.git".to_string()).unwrap();
        store
            .set_raw(keys::generated_content("glossary"), serde_json::Value::String("# Glossary".to_string()))
            .unwrap();
        store
            .put(
                keys::CORE_MODULES,
                &vec![ModuleDescriptor {
                    name: "auth".to_string(),
                    path: "src/auth".to_string(),
                    description: "d".to_string(),
                    importance: 5,
                    depends_on: vec![],
                }],
            )
            .unwrap();
        store
            .set_raw(keys::module_detail("auth"), serde_json::Value::String("# Auth".to_string()))
            .unwrap();

        let node = AssembleDocumentsNode {
            output_dir: std::path::PathBuf::from("/tmp/unused"),
        };
        let prep = node.prep(&store).await.unwrap();
        assert_eq!(prep.repo_name, "widget");
        assert!(prep.section_contents.contains_key("glossary"));
        assert_eq!(prep.module_contents.len(), 1);
    }

    #[tokio::test]
    async fn full_pipeline_writes_expected_file_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::default();
        store.put(keys::REPO_SOURCE, &"acme-widget".to_string()).unwrap();
        store
            .set_raw(keys::generated_content("glossary"), serde_json::Value::String("# Glossary\n\nauth is important.".to_string()))
            .unwrap();
        store
            .put(
                keys::CORE_MODULES,
                &vec![ModuleDescriptor {
                    name: "auth".to_string(),
                    path: "src/auth".to_string(),
                    description: "d".to_string(),
                    importance: 5,
                    depends_on: vec![],
                }],
            )
            .unwrap();
        store
            .set_raw(keys::module_detail("auth"), serde_json::Value::String("# Auth\n\nDetails.".to_string()))
            .unwrap();

        let node = AssembleDocumentsNode {
            output_dir: dir.path().to_path_buf(),
        };
        let prep = node.prep(&store).await.unwrap();
        let exec = node.exec(&prep, &ExecutionContext::default()).await.unwrap();
        node.post(&mut store, prep, exec).await.unwrap();

        assert!(dir.path().join("acme-widget/index.md").exists());
        assert!(dir.path().join("acme-widget/glossary.md").exists());
        assert!(dir.path().join("acme-widget/modules/auth.md").exists());
        let glossary = std::fs::read_to_string(dir.path().join("acme-widget/glossary.md")).unwrap();
        assert!(glossary.contains("modules/auth.md"));
    }
}
