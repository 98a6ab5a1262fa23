//! Entities exchanged through the blackboard (§3.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single source file discovered during `ParseCodeBatch`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub language: String,
    pub size_bytes: u64,
    pub is_binary: bool,
    pub ast_summary: Option<String>,
    pub imports: Vec<String>,
    pub exported_symbols: Vec<String>,
}

/// One commit from `AnalyzeHistory`, ordered newest-first in `commit_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author: String,
    pub timestamp: i64,
    pub subject: String,
    pub changed_files: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
}

/// An LLM-proposed module, validated against `code_structure` before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub path: String,
    pub description: String,
    pub importance: u8,
    pub depends_on: Vec<String>,
}

/// A bounded text fragment prepared for retrieval-augmented generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    pub byte_range: (usize, usize),
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Fatal,
    Recoverable,
    Warning,
}

/// One entry in `process_status.errors` (§7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: i64,
    pub retry_count: usize,
    pub recovered: bool,
}

impl ErrorRecord {
    pub fn new(stage: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp(),
            retry_count: 0,
            recovered: false,
        }
    }

    pub fn with_retry_count(mut self, retries: usize) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn recovered(mut self) -> Self {
        self.recovered = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// A Mermaid block that failed validation (or was regenerated), kept for `report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub document_path: String,
    pub chart_index: usize,
    pub chart_text: String,
    pub error_message: String,
    pub severity: Severity,
}

/// A cached LLM response, persisted under `<cache_dir>/llm/<hash>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub response: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub created_at: i64,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: i64) -> bool {
        (now - self.created_at) < self.ttl_seconds as i64
    }
}

/// A cached repository clone, persisted under `<cache_dir>/repo/<url_hash>.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoCacheEntry {
    pub url_hash: String,
    pub local_path: String,
    pub fetched_at: i64,
    pub ttl_seconds: u64,
    pub branch: String,
}

impl RepoCacheEntry {
    pub fn is_fresh(&self, now: i64) -> bool {
        (now - self.fetched_at) < self.ttl_seconds as i64
    }
}

/// Coarse per-repository statistics computed by `PrepareRepo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoStats {
    pub total_size: u64,
    pub file_count: usize,
    pub language_breakdown: HashMap<String, usize>,
}

/// A directed edge of the module dependency graph (`dependencies` key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

/// Module dependency graph: stable integer ids with a side map to names, so
/// cycles can be represented and annotated without unbounded traversal (§9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub node_names: Vec<String>,
    pub edges: Vec<(usize, usize)>,
    pub cycles: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub const EXTERNAL: &'static str = "external";

    pub fn node_id(&mut self, name: &str) -> usize {
        if let Some(pos) = self.node_names.iter().position(|n| n == name) {
            return pos;
        }
        self.node_names.push(name.to_string());
        self.node_names.len() - 1
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        let a = self.node_id(from);
        let b = self.node_id(to);
        if !self.edges.contains(&(a, b)) {
            self.edges.push((a, b));
        }
    }

    /// Detect simple cycles via DFS, tolerating and recording them rather than
    /// treating them as an error (§9: "never traversed depth-unbounded").
    pub fn detect_cycles(&mut self) {
        let n = self.node_names.len();
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(a, b) in &self.edges {
            adj[a].push(b);
        }
        let mut color = vec![0u8; n]; // 0=white,1=gray,2=black
        let mut stack = Vec::new();
        let mut cycles = Vec::new();

        fn visit(
            u: usize,
            adj: &[Vec<usize>],
            color: &mut [u8],
            stack: &mut Vec<usize>,
            cycles: &mut Vec<Vec<usize>>,
        ) {
            color[u] = 1;
            stack.push(u);
            for &v in &adj[u] {
                match color[v] {
                    0 => visit(v, adj, color, stack, cycles),
                    1 => {
                        if let Some(start) = stack.iter().position(|&x| x == v) {
                            cycles.push(stack[start..].to_vec());
                        }
                    }
                    _ => {}
                }
            }
            stack.pop();
            color[u] = 2;
        }

        for u in 0..n {
            if color[u] == 0 {
                visit(u, &adj, &mut color, &mut stack, &mut cycles);
            }
        }
        self.cycles = cycles;
    }
}
