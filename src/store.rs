//! The shared state store (the blackboard, §3.1/§4.2): a single keyed bag of
//! JSON values that every node in a run reads `prep` input from and writes
//! `post` output to. Mutation only happens in `post`, and the engine
//! serializes node execution per predecessor, so the blackboard never needs
//! its own locking beyond `Arc<Mutex<_>>` for the async/parallel runners.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::storage::{InMemoryStorage, StorageBackend};

/// Error returned by typed accessors: either the backend failed, the key was
/// absent, or the stored JSON didn't deserialize into the requested type.
#[derive(Debug)]
pub enum StoreError<E> {
    Backend(E),
    Missing(String),
    Deserialize { key: String, source: serde_json::Error },
}

impl<E: fmt::Display> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(e) => write!(f, "storage backend error: {e}"),
            StoreError::Missing(key) => write!(f, "missing blackboard key: {key}"),
            StoreError::Deserialize { key, source } => {
                write!(f, "could not deserialize blackboard key {key}: {source}")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for StoreError<E> {}

/// Well-known blackboard keys (§3.1), grouped by the stage that writes them.
pub mod keys {
    pub const REPO_SOURCE: &str = "repo_source";
    pub const TARGET_LANGUAGE: &str = "target_language";
    pub const OUTPUT_DIR: &str = "output_dir";
    pub const LOCAL_REPO_PATH: &str = "local_repo_path";
    pub const REPO_STATS: &str = "repo_stats";

    pub const CODE_STRUCTURE: &str = "code_structure";
    pub const COMMIT_HISTORY: &str = "commit_history";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const CORE_MODULES: &str = "ai_analysis.core_modules";
    pub const ARCHITECTURE_SUMMARY: &str = "ai_analysis.architecture_summary";
    pub const RAG_CHUNKS: &str = "rag.chunks";

    pub const MERMAID_REPORT: &str = "mermaid_report";
    pub const FINAL_DOCUMENTS: &str = "final_documents";
    pub const PROCESS_ERRORS: &str = "process_status.errors";

    pub fn generated_content(section: &str) -> String {
        format!("generated_content.{section}")
    }

    pub fn module_detail(module_name: &str) -> String {
        format!("generated_content.module_details.{module_name}")
    }

    pub fn quality_score(section: &str) -> String {
        format!("quality_scores.{section}")
    }

    pub fn regeneration_attempts(section: &str) -> String {
        format!("regeneration_attempts.{section}")
    }
}

/// Thin typed facade over a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct Store<B: StorageBackend> {
    backend: B,
}

impl Default for Store<InMemoryStorage> {
    fn default() -> Self {
        Store::new(InMemoryStorage::new())
    }
}

impl<B: StorageBackend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) -> Result<(), StoreError<B::Error>> {
        self.backend.set(key.into(), value).map_err(StoreError::Backend)
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<Value>, StoreError<B::Error>> {
        self.backend.get(key).map_err(StoreError::Backend)
    }

    pub fn remove_raw(&mut self, key: &str) -> Result<Option<Value>, StoreError<B::Error>> {
        self.backend.remove(key).map_err(StoreError::Backend)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, StoreError<B::Error>> {
        self.backend.contains_key(key).map_err(StoreError::Backend)
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError<B::Error>> {
        self.backend.keys().map_err(StoreError::Backend)
    }

    pub fn clear(&mut self) -> Result<(), StoreError<B::Error>> {
        self.backend.clear().map_err(StoreError::Backend)
    }

    pub fn len(&self) -> Result<usize, StoreError<B::Error>> {
        self.backend.len().map_err(StoreError::Backend)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError<B::Error>> {
        Ok(self.len()? == 0)
    }

    /// Serialize `value` and write it under `key`.
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError<B::Error>> {
        let json = serde_json::to_value(value).map_err(|source| StoreError::Deserialize {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, json)
    }

    /// Read and deserialize the value at `key`, erroring if absent.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError<B::Error>> {
        let value = self
            .get_raw(key)?
            .ok_or_else(|| StoreError::Missing(key.to_string()))?;
        serde_json::from_value(value).map_err(|source| StoreError::Deserialize {
            key: key.to_string(),
            source,
        })
    }

    /// Read and deserialize the value at `key`, returning `None` if absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError<B::Error>> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Deserialize {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Read and deserialize, falling back to `default` if absent.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError<B::Error>> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Append an error record onto the `process_status.errors` list, creating
    /// it if this is the first error of the run.
    pub fn push_error(&mut self, record: crate::types::ErrorRecord) -> Result<(), StoreError<B::Error>> {
        let mut errors: Vec<crate::types::ErrorRecord> =
            self.get_or(keys::PROCESS_ERRORS, Vec::new())?;
        errors.push(record);
        self.put(keys::PROCESS_ERRORS, &errors)
    }
}

pub type Blackboard = Store<InMemoryStorage>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, ErrorRecord};

    #[test]
    fn typed_put_and_require_roundtrip() {
        let mut store = Blackboard::default();
        store.put(keys::TARGET_LANGUAGE, &"en".to_string()).unwrap();
        let lang: String = store.require(keys::TARGET_LANGUAGE).unwrap();
        assert_eq!(lang, "en");
    }

    #[test]
    fn require_missing_key_errors() {
        let store = Blackboard::default();
        let result: Result<String, _> = store.require(keys::TARGET_LANGUAGE);
        assert!(matches!(result, Err(StoreError::Missing(_))));
    }

    #[test]
    fn get_or_falls_back_to_default() {
        let store = Blackboard::default();
        let v: usize = store.get_or("missing", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn push_error_accumulates() {
        let mut store = Blackboard::default();
        store
            .push_error(ErrorRecord::new("prepare_repo", ErrorKind::Warning, "slow clone"))
            .unwrap();
        store
            .push_error(ErrorRecord::new("parse_code", ErrorKind::Recoverable, "skip binary"))
            .unwrap();
        let errors: Vec<ErrorRecord> = store.require(keys::PROCESS_ERRORS).unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].stage, "prepare_repo");
    }

    #[test]
    fn namespaced_key_helpers_format_correctly() {
        assert_eq!(keys::generated_content("overview"), "generated_content.overview");
        assert_eq!(keys::module_detail("auth"), "generated_content.module_details.auth");
        assert_eq!(keys::quality_score("overview"), "quality_scores.overview");
    }
}
