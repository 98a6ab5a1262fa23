//! LLM response cache (§4.3 steps 3/9, §6.4): an in-process `moka` cache
//! fronting on-disk `<cache_dir>/llm/<hash>.json` files. Reads check memory
//! first, then disk, promoting a disk hit back into memory; writes go to
//! both so a second process sees the first process's cache.

use moka::sync::Cache as MokaCache;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::CacheEntry;

/// Computes the stable cache key for a `generate` call: a hash of
/// `(prompt, model, temperature, max_tokens)` per §4.3 step 3.
pub fn cache_key(prompt: &str, model: &str, temperature: f32, max_tokens: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(temperature.to_bits().to_le_bytes());
    hasher.update(b"\0");
    hasher.update(max_tokens.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct LlmCache {
    memory: MokaCache<String, CacheEntry>,
    cache_dir: PathBuf,
}

impl LlmCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            memory: MokaCache::new(10_000),
            cache_dir: cache_dir.as_ref().join("llm"),
        }
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    pub fn get(&self, key: &str, now: i64) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key) {
            if entry.is_fresh(now) {
                return Some(entry);
            }
            self.memory.invalidate(key);
            return None;
        }

        let path = self.disk_path(key);
        let text = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&text).ok()?;
        if !entry.is_fresh(now) {
            let _ = fs::remove_file(&path);
            return None;
        }
        self.memory.insert(key.to_string(), entry.clone());
        Some(entry)
    }

    pub fn put(&self, key: &str, entry: CacheEntry) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.disk_path(key);
        let json = serde_json::to_string_pretty(&entry).expect("CacheEntry always serializes");
        fs::write(path, json)?;
        self.memory.insert(key.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_sensitive_to_every_field() {
        let a = cache_key("prompt", "openai/gpt-4o-mini", 0.2, 1000);
        let b = cache_key("prompt", "openai/gpt-4o-mini", 0.2, 1000);
        let c = cache_key("prompt", "openai/gpt-4o-mini", 0.3, 1000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn round_trips_through_disk_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path());
        let key = cache_key("p", "m", 0.1, 10);
        let entry = CacheEntry {
            key: key.clone(),
            response: "hello".to_string(),
            model: "m".to_string(),
            input_tokens: 1,
            output_tokens: 1,
            created_at: 1000,
            ttl_seconds: 3600,
        };
        cache.put(&key, entry.clone()).unwrap();

        let fresh = cache.get(&key, 1500).unwrap();
        assert_eq!(fresh.response, "hello");

        let stale = cache.get(&key, 1000 + 4000);
        assert!(stale.is_none());
    }
}
