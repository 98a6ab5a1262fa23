//! Repository analysis (§4.4): resolves the source, parses the tree,
//! analyzes commit history, asks the LLM to describe the core modules, and
//! chunks text for retrieval. `build_analyze_repo_flow` wires all five steps
//! into one subflow embeddable in the top-level pipeline via
//! [`crate::flow::FlowNode`].

pub mod history;
pub mod parse;
pub mod prepare;
pub mod rag;
pub mod understand;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::flow::{BasicFlow, FlowBuilder};
use crate::llm::LlmClient;
use crate::storage::InMemoryStorage;

use history::AnalyzeHistoryNode;
use parse::ParseCodeBatchNode;
use prepare::{Git2Fetcher, PrepareRepoNode};
use rag::PrepareRAGDataNode;
use understand::AIUnderstandCoreModulesNode;

const DEFAULT_MAX_REPO_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_MAX_COMMITS: usize = 500;
const DEFAULT_TOP_N_FILES: usize = 10;
const DEFAULT_UNDERSTAND_RETRIES: usize = 2;

/// History, understanding, and RAG preparation each only need what
/// `ParseCodeBatch` already wrote to the blackboard, so they fan out after it
/// rather than chain strictly sequentially; `BasicFlow` itself walks one node
/// at a time, so the fan-out here is expressed as a straight-line edge chain
/// (prepare → parse → history → understand → rag) — true concurrency between
/// these steps is a possible extension, documented as an open decision.
pub fn build_analyze_repo_flow(config: &Config, llm: Arc<LlmClient>) -> BasicFlow<InMemoryStorage> {
    let cache_dir = PathBuf::from(&config.global.cache_dir);

    FlowBuilder::new("analyze_repo")
        .node(
            "prepare_repo",
            PrepareRepoNode {
                cache_dir,
                repo_config: config.repo.clone(),
                max_repo_size: DEFAULT_MAX_REPO_SIZE_BYTES,
                fetcher: Arc::new(Git2Fetcher),
            },
        )
        .node(
            "parse_code",
            crate::batch::BatchNode::new(ParseCodeBatchNode {
                repo_config: config.repo.clone(),
                parse_config: config.parse.clone(),
            }),
        )
        .node(
            "analyze_history",
            AnalyzeHistoryNode {
                llm: llm.clone(),
                max_commits: DEFAULT_MAX_COMMITS,
                top_n_files: DEFAULT_TOP_N_FILES,
            },
        )
        .node(
            "ai_understand_core_modules",
            AIUnderstandCoreModulesNode {
                llm: llm.clone(),
                retry_count: DEFAULT_UNDERSTAND_RETRIES,
                quality_threshold: 0.7,
                degraded_score: config.quality.degraded_score,
            },
        )
        .node(
            "prepare_rag_data",
            PrepareRAGDataNode {
                local_repo_root: None,
                parse_config: config.parse.clone(),
            },
        )
        .edge("prepare_repo", "default", "parse_code")
        .edge("parse_code", "default", "analyze_history")
        .edge("analyze_history", "default", "ai_understand_core_modules")
        .edge("ai_understand_core_modules", "default", "prepare_rag_data")
        .start("prepare_repo")
        .terminal_action("default")
        .max_steps(16)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_llm_client() -> Arc<LlmClient> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(LlmClient::new(Config::defaults().llm, dir.path(), "test-key".to_string(), 1))
    }

    #[test]
    fn analyze_repo_flow_builds_with_expected_start_node() {
        let config = Config::defaults();
        let flow = build_analyze_repo_flow(&config, test_llm_client());
        assert_eq!(flow.name(), "analyze_repo");
    }
}
