//! Action labels returned by node `post` phases to select the next edge in a flow.
//!
//! Every node's `post` phase returns an [`Action`]. A [`crate::flow::Flow`] looks up
//! the edge registered for that action's name from the current node; the reserved
//! names `"default"` (single-successor nodes) and `"error"` (routed to a recovery
//! node, if any) have engine-level meaning, everything else is pipeline-defined
//! (`"regenerate"`, `"accept"`, `"degraded"`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_ACTION: &str = "default";
pub const ERROR_ACTION: &str = "error";

/// A flow-control label, optionally carrying small amounts of routing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Plain string label (the common case).
    Simple(String),
    /// A label with key/value context a downstream node's `prep` may read back
    /// out of `ExecutionContext::metadata` rather than the blackboard — used for
    /// things like carrying a regeneration attempt count or a quality score
    /// alongside the route decision.
    Parameterized {
        name: String,
        params: HashMap<String, Value>,
    },
}

impl Action {
    pub fn simple<S: Into<String>>(name: S) -> Self {
        Action::Simple(name.into())
    }

    pub fn with_params<S: Into<String>>(name: S, params: HashMap<String, Value>) -> Self {
        Action::Parameterized {
            name: name.into(),
            params,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Simple(name) => name,
            Action::Parameterized { name, .. } => name,
        }
    }

    pub fn params(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Action::Parameterized { params, .. } => Some(params),
            Action::Simple(_) => None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.name() == DEFAULT_ACTION
    }

    pub fn is_error(&self) -> bool {
        self.name() == ERROR_ACTION
    }

    pub fn default_action() -> Self {
        Action::Simple(DEFAULT_ACTION.to_string())
    }

    pub fn error() -> Self {
        Action::Simple(ERROR_ACTION.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Action::Simple(s.to_string())
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Action::Simple(s)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_action_roundtrips() {
        let a: Action = "continue".into();
        assert_eq!(a.name(), "continue");
        assert!(a.params().is_none());
    }

    #[test]
    fn default_and_error_are_reserved_names() {
        assert!(Action::default_action().is_default());
        assert!(Action::error().is_error());
        assert!(!Action::simple("regenerate").is_default());
    }

    #[test]
    fn parameterized_action_carries_context() {
        let mut params = HashMap::new();
        params.insert("attempt".to_string(), json!(2));
        let a = Action::with_params("regenerate", params);
        assert_eq!(a.name(), "regenerate");
        assert_eq!(a.params().unwrap().get("attempt"), Some(&json!(2)));
    }

    #[test]
    fn serialization_roundtrip() {
        let a = Action::simple("accept");
        let s = serde_json::to_string(&a).unwrap();
        let back: Action = serde_json::from_str(&s).unwrap();
        assert_eq!(a, back);
    }
}
