//! Top-level orchestration (§2, §5): wires repository analysis, content
//! generation, Mermaid validation, and assembly into one run, and collects
//! the `report.json` contract (§6.3) along the way.
//!
//! Node errors carry precise `thiserror` variants; this boundary is where
//! they become a single `anyhow::Result<PipelineReport>` a CLI caller can
//! match on without reaching into every collaborator's error type.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::PipelineError;
use crate::generate::build_generate_content_flow;
use crate::llm::LlmClient;
use crate::mermaid::MermaidValidationNode;
use crate::node::Node;
use crate::repo::build_analyze_repo_flow;
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::ErrorRecord;

/// Summary persisted as `report.json` (§6.3): per-section quality scores,
/// Mermaid findings, per-stage error records, and the documents written.
#[derive(Debug, serde::Serialize)]
pub struct PipelineReport {
    pub quality_scores: HashMap<String, f64>,
    pub mermaid_findings: Vec<crate::types::ValidationFinding>,
    pub errors: Vec<ErrorRecord>,
    pub documents_written: Vec<String>,
}

impl PipelineReport {
    fn from_store(store: &Store<InMemoryStorage>) -> Result<Self, PipelineError> {
        let mut quality_scores = HashMap::new();
        for key in store.keys().map_err(|e| PipelineError::FatalBeforeWrite(e.to_string()))? {
            if let Some(section) = key.strip_prefix("quality_scores.") {
                if let Ok(Some(score)) = store.get::<f64>(&key) {
                    quality_scores.insert(section.to_string(), score);
                }
            }
        }

        let mermaid_findings = store
            .get(keys::MERMAID_REPORT)
            .map_err(|e| PipelineError::FatalBeforeWrite(e.to_string()))?
            .unwrap_or_default();
        let errors = store
            .get(keys::PROCESS_ERRORS)
            .map_err(|e| PipelineError::FatalBeforeWrite(e.to_string()))?
            .unwrap_or_default();
        let documents_written = store
            .get(keys::FINAL_DOCUMENTS)
            .map_err(|e| PipelineError::FatalBeforeWrite(e.to_string()))?
            .unwrap_or_default();

        Ok(Self {
            quality_scores,
            mermaid_findings,
            errors,
            documents_written,
        })
    }

    /// `0` on success or partial-with-report, non-zero only if nothing was
    /// ever written (§6.3's exit status contract).
    pub fn exit_code(&self) -> i32 {
        if self.documents_written.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Runs the full pipeline end to end: analyze the repository, generate
/// content, validate Mermaid diagrams, assemble the output tree.
pub async fn run_pipeline(
    config: &Config,
    repo_source: &str,
    target_language: &str,
    output_dir: &Path,
    api_key: String,
) -> anyhow::Result<PipelineReport> {
    let cache_dir = PathBuf::from(&config.global.cache_dir);
    let llm = Arc::new(LlmClient::new(config.llm.clone(), &cache_dir, api_key, config.global.max_concurrent_llm_calls));

    let mut store: Store<InMemoryStorage> = Store::default();
    store.put(keys::REPO_SOURCE, &repo_source.to_string())?;
    store.put(keys::TARGET_LANGUAGE, &target_language.to_string())?;
    store.put(keys::OUTPUT_DIR, &output_dir.to_string_lossy().to_string())?;

    let analyze_flow = build_analyze_repo_flow(config, llm.clone());
    analyze_flow
        .run_once(&mut store)
        .await
        .map_err(PipelineError::from)
        .map_err(|e| anyhow::anyhow!(PipelineError::FatalBeforeWrite(e.to_string())))?;

    let local_repo_root: Option<PathBuf> = store.get(keys::LOCAL_REPO_PATH)?;

    let generate_flow = build_generate_content_flow(config, llm.clone(), repo_source, local_repo_root);
    generate_flow.run_once(&mut store).await.map_err(PipelineError::from)?;

    let mermaid_node = Node::new(MermaidValidationNode {
        llm: llm.clone(),
        mermaid: config.mermaid.clone(),
    });
    mermaid_node.run(&mut store).await.map_err(PipelineError::from)?;

    let assemble_node = Node::new(crate::assemble::AssembleDocumentsNode {
        output_dir: output_dir.to_path_buf(),
    });
    assemble_node.run(&mut store).await.map_err(PipelineError::from)?;

    let report = PipelineReport::from_store(&store)?;
    if report.documents_written.is_empty() {
        return Err(anyhow::anyhow!(PipelineError::FatalBeforeWrite(
            "no documents were written before the run ended".to_string()
        )));
    }

    Ok(report)
}

/// Writes `report` as `<output_dir>/report.json`, matching §6.3's optional
/// machine-readable output.
pub fn write_report_json(output_dir: &Path, report: &PipelineReport) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());
    std::fs::write(output_dir.join("report.json"), json)
}
