//! Crate-wide error taxonomy (§7). Node, flow, and LLM layers each keep a
//! precise `thiserror` enum (`NodeError` in [`crate::node`], `FlowError` in
//! [`crate::flow`], [`LlmError`] here); [`PipelineError`] wraps whichever one
//! surfaces at the pipeline-orchestration boundary, re-exposed as
//! `anyhow::Result` at the outermost layer while keeping inner variants
//! precise.

use thiserror::Error;

use crate::flow::FlowError;
use crate::node::NodeError;
use crate::types::ErrorKind;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to provider '{provider}' failed: {message}")]
    Request { provider: String, message: String },
    #[error("provider '{provider}' circuit breaker is open")]
    CircuitOpen { provider: String },
    #[error("response from '{provider}' failed validation: {reason}")]
    InvalidResponse { provider: String, reason: String },
    #[error("prompt exceeds model context window even after trimming ({tokens} tokens, budget {budget})")]
    PromptTooLarge { tokens: usize, budget: usize },
    #[error("unrecognized model string '{0}', expected provider[/upstream]/model")]
    BadModelString(String),
    #[error("cache I/O error: {0}")]
    Cache(String),
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("repo cache lock for '{url}' could not be acquired: {message}")]
    LockContention { url: String, message: String },
    #[error("unsupported repo source: {0}")]
    UnsupportedSource(String),
}

#[derive(Debug, Error)]
pub enum MermaidError {
    #[error("chart at offset {offset} in '{document}' failed validation: {reason}")]
    Invalid {
        document: String,
        offset: usize,
        reason: String,
    },
    #[error("regeneration exhausted after {attempts} attempt(s) for chart in '{document}'")]
    RegenerationExhausted { document: String, attempts: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
    #[error("failed to parse configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("required process variable '{0}' is not set")]
    MissingVariable(String),
}

/// The error a `Node`/`Flow`/LLM-layer failure is classified as before it's
/// recorded in `process_status.errors` (§7): `Fatal` aborts the run, and the
/// taxonomy here only classifies — it never decides propagation on its own.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for LlmError {
    fn kind(&self) -> ErrorKind {
        match self {
            LlmError::PromptTooLarge { .. } | LlmError::BadModelString(_) => ErrorKind::Fatal,
            LlmError::CircuitOpen { .. } | LlmError::Request { .. } => ErrorKind::Recoverable,
            LlmError::InvalidResponse { .. } => ErrorKind::Warning,
            LlmError::Cache(_) => ErrorKind::Warning,
        }
    }
}

impl Classify for RepoError {
    fn kind(&self) -> ErrorKind {
        match self {
            RepoError::Git(_) | RepoError::UnsupportedSource(_) => ErrorKind::Fatal,
            RepoError::Io(_) | RepoError::LockContention { .. } => ErrorKind::Recoverable,
        }
    }
}

impl Classify for MermaidError {
    fn kind(&self) -> ErrorKind {
        match self {
            MermaidError::Invalid { .. } => ErrorKind::Warning,
            MermaidError::RegenerationExhausted { .. } => ErrorKind::Warning,
        }
    }
}

/// The error type `anyhow::Result<PipelineReport>` wraps at the top-level
/// `run_pipeline` boundary (§7's ambient addition): internal layers keep
/// precise `thiserror` variants; this is the seam where they become one type
/// callers can match on without reaching into every collaborator's module.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Mermaid(#[from] MermaidError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("fatal error before any document was written: {0}")]
    FatalBeforeWrite(String),
}
