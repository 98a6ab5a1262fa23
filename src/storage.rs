//! Storage backend for the shared state store (the blackboard, §4.2).
//!
//! The blackboard is a process-wide single instance per run with no cross-run
//! persistence, so the only backend this crate needs is an in-memory one.
//! File/Redis/SeaORM-style durable backends would exist for durable client
//! state, which this pipeline never has.

use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Interface a [`crate::store::SharedStore`] delegates to.
pub trait StorageBackend: Send + Sync {
    type Error: Error + Send + Sync + 'static;

    fn set(&mut self, key: String, value: Value) -> Result<(), Self::Error>;
    fn get(&self, key: &str) -> Result<Option<Value>, Self::Error>;
    fn remove(&mut self, key: &str) -> Result<Option<Value>, Self::Error>;
    fn contains_key(&self, key: &str) -> Result<bool, Self::Error>;
    fn keys(&self) -> Result<Vec<String>, Self::Error>;
    fn clear(&mut self) -> Result<(), Self::Error>;
    fn len(&self) -> Result<usize, Self::Error>;

    fn is_empty(&self) -> Result<bool, Self::Error> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct InMemoryError;

impl fmt::Display for InMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in-memory storage does not produce errors")
    }
}

impl Error for InMemoryError {}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: HashMap::with_capacity(capacity),
        }
    }
}

impl StorageBackend for InMemoryStorage {
    type Error = InMemoryError;

    fn set(&mut self, key: String, value: Value) -> Result<(), Self::Error> {
        self.data.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, Self::Error> {
        Ok(self.data.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<Option<Value>, Self::Error> {
        Ok(self.data.remove(key))
    }

    fn contains_key(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.data.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.data.keys().cloned().collect())
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.data.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_remove_roundtrip() {
        let mut s = InMemoryStorage::new();
        s.set("k".into(), json!(1)).unwrap();
        assert_eq!(s.get("k").unwrap(), Some(json!(1)));
        assert_eq!(s.remove("k").unwrap(), Some(json!(1)));
        assert_eq!(s.get("k").unwrap(), None);
    }

    #[test]
    fn keys_and_clear() {
        let mut s = InMemoryStorage::new();
        s.set("a".into(), json!(1)).unwrap();
        s.set("b".into(), json!(2)).unwrap();
        let mut keys = s.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        s.clear().unwrap();
        assert!(s.is_empty().unwrap());
    }
}
