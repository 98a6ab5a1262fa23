//! # repo-atlas
//!
//! A dataflow orchestration core that turns a Git repository into a
//! multi-file knowledge document via LLM-backed content generators.
//!
//! The system models the pipeline as a **Graph + Shared Store**:
//! - **Node**: a prep/exec/post lifecycle around one unit of work
//! - **Flow**: connects nodes through **Actions** (labeled edges), possibly
//!   nesting another flow as a single node
//! - **Shared Store**: the blackboard every node reads its input from and
//!   writes its output to
//!
//! ## Module map
//!
//! - [`action`] / [`node`] / [`flow`] / [`batch`] / [`storage`] / [`store`] —
//!   the Graph Engine and Shared State Store (§4.1/§4.2)
//! - [`types`] — entities exchanged through the blackboard (§3.2)
//! - [`config`] — layered configuration (§6.1)
//! - [`error`] — the crate-wide error taxonomy (§7)
//! - [`llm`] — provider-agnostic LLM call layer (§4.3)
//! - [`repo`] — repository analysis pipeline (§4.4)
//! - [`generate`] — content generation pipeline (§4.5)
//! - [`mermaid`] — Mermaid diagram validation engine (§4.6)
//! - [`assemble`] — combine + format assembly stage (§4.7)
//! - [`pipeline`] — top-level orchestration wiring the full flow graph (§2, §5)

pub mod action;
pub mod batch;
pub mod config;
pub mod error;
pub mod flow;
pub mod node;
pub mod storage;
pub mod store;
pub mod types;

pub mod llm;
pub mod repo;
pub mod generate;
pub mod mermaid;
pub mod assemble;
pub mod pipeline;

pub use action::Action;
pub use config::Config;
pub use error::PipelineError;
pub use flow::{BasicFlow, FlowBuilder, FlowError, FlowExecutionResult, FlowNode};
pub use node::{ExecutionContext, Node, NodeBackend, NodeError};
pub use storage::{InMemoryStorage, StorageBackend};
pub use store::{Blackboard, Store};

/// Commonly used types and traits for building flows against this crate.
pub mod prelude {
    pub use crate::action::{Action, DEFAULT_ACTION, ERROR_ACTION};
    pub use crate::batch::{BatchItem, BatchMode, BatchNode, BatchNodeBackend};
    pub use crate::config::Config;
    pub use crate::error::{Classify, PipelineError};
    pub use crate::flow::{BasicFlow, FlowBuilder, FlowError, FlowExecutionResult, FlowNode, RouteCondition};
    pub use crate::node::{ExecutionContext, Node, NodeBackend, NodeError};
    pub use crate::storage::{InMemoryStorage, StorageBackend};
    pub use crate::store::{keys, Blackboard, Store};
    pub use serde_json::Value as JsonValue;
}
