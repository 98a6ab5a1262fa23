//! `PrepareRepo` (§4.4.1): resolves `repo_source` to a local working
//! directory, either by copying/cloning into an on-disk cache or by
//! verifying a local path directly, then computes coarse repo statistics.

use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::RepoConfig;
use crate::node::{ExecutionContext, NodeBackend, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::RepoStats;

/// Abstracts the actual network clone so cache-hit behavior (§4.4.1's S2:
/// a fresh cache entry must skip the clone entirely) can be tested without a
/// real git remote.
pub trait RepoFetcher: Send + Sync {
    fn clone_repo(&self, url: &str, dest: &Path, depth: Option<u32>) -> Result<(), NodeError>;
}

pub struct Git2Fetcher;

impl RepoFetcher for Git2Fetcher {
    fn clone_repo(&self, url: &str, dest: &Path, depth: Option<u32>) -> Result<(), NodeError> {
        let mut builder = git2::build::RepoBuilder::new();
        if depth.is_some() {
            let mut fetch_options = git2::FetchOptions::new();
            fetch_options.depth(1);
            builder.fetch_options(fetch_options);
        }
        builder.clone(url, dest).map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("git clone failed: {e}"),
        })?;
        Ok(())
    }
}

pub struct PrepareRepoNode {
    pub cache_dir: PathBuf,
    pub repo_config: RepoConfig,
    pub max_repo_size: u64,
    pub fetcher: Arc<dyn RepoFetcher>,
}

fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://") || source.starts_with("git@")
}

#[async_trait]
impl NodeBackend<InMemoryStorage> for PrepareRepoNode {
    type Prep = String;
    type Exec = (PathBuf, RepoStats);

    fn name(&self) -> &str {
        "prepare_repo"
    }

    async fn prep(&self, store: &Store<InMemoryStorage>) -> Result<String, NodeError> {
        store.require(keys::REPO_SOURCE).map_err(NodeError::from)
    }

    async fn exec(&self, source: &String, _ctx: &ExecutionContext) -> Result<Self::Exec, NodeError> {
        let local_path = if is_url(source) {
            self.fetch_via_cache(source).await?
        } else {
            self.verify_local_path(source)?
        };
        let stats = self.compute_stats(&local_path)?;
        if stats.total_size > self.max_repo_size {
            return Err(NodeError::Exec {
                attempts: 1,
                message: format!(
                    "repo size {} exceeds max_repo_size {}",
                    stats.total_size, self.max_repo_size
                ),
            });
        }
        Ok((local_path, stats))
    }

    async fn post(
        &self,
        store: &mut Store<InMemoryStorage>,
        _prep: String,
        (local_path, stats): Self::Exec,
    ) -> Result<crate::action::Action, NodeError> {
        store
            .set_raw(
                keys::LOCAL_REPO_PATH,
                serde_json::Value::String(local_path.display().to_string()),
            )
            .map_err(NodeError::from)?;
        store.put(keys::REPO_STATS, &stats).map_err(NodeError::from)?;
        Ok(crate::action::Action::default_action())
    }
}

impl PrepareRepoNode {
    /// Clones are serialized per URL with an `fs2` advisory file lock so two
    /// runs targeting the same source never duplicate the network fetch.
    async fn fetch_via_cache(&self, url: &str) -> Result<PathBuf, NodeError> {
        let hash = url_hash(url);
        let repo_dir = self.cache_dir.join("repo").join(&hash);
        let meta_path = self.cache_dir.join("repo").join(format!("{hash}.meta"));
        let lock_path = self.cache_dir.join("repo").join(format!("{hash}.lock"));

        fs::create_dir_all(repo_dir.parent().unwrap_or(&self.cache_dir)).map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("failed to prepare cache dir: {e}"),
        })?;

        let lock_file = File::create(&lock_path).map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("failed to open repo cache lock: {e}"),
        })?;
        lock_file.lock_exclusive().map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("failed to acquire repo cache lock: {e}"),
        })?;

        let now = chrono::Utc::now().timestamp();
        let needs_clone = match fs::read_to_string(&meta_path) {
            Ok(text) => {
                let entry: Result<crate::types::RepoCacheEntry, _> = serde_json::from_str(&text);
                match entry {
                    Ok(entry) if entry.is_fresh(now) && repo_dir.exists() => false,
                    _ => true,
                }
            }
            Err(_) => true,
        };

        if needs_clone {
            if repo_dir.exists() {
                fs::remove_dir_all(&repo_dir).map_err(|e| NodeError::Exec {
                    attempts: 1,
                    message: format!("failed to clear stale repo cache entry: {e}"),
                })?;
            }
            self.fetcher.clone_repo(url, &repo_dir, self.repo_config.clone_depth)?;

            let meta = crate::types::RepoCacheEntry {
                url_hash: hash.clone(),
                local_path: repo_dir.display().to_string(),
                fetched_at: now,
                ttl_seconds: self.repo_config.cache_ttl_seconds,
                branch: "HEAD".to_string(),
            };
            let meta_json = serde_json::to_string_pretty(&meta).expect("RepoCacheEntry always serializes");
            fs::write(&meta_path, meta_json).map_err(|e| NodeError::Exec {
                attempts: 1,
                message: format!("failed to write repo cache metadata: {e}"),
            })?;
        }

        fs2::FileExt::unlock(&lock_file).ok();
        Ok(repo_dir)
    }

    fn verify_local_path(&self, source: &str) -> Result<PathBuf, NodeError> {
        let path = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
        let metadata = fs::metadata(&path).map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("local repo source '{source}' is not readable: {e}"),
        })?;
        if !metadata.is_dir() {
            return Err(NodeError::Exec {
                attempts: 1,
                message: format!("local repo source '{source}' is not a directory"),
            });
        }
        Ok(path)
    }

    fn compute_stats(&self, root: &Path) -> Result<RepoStats, NodeError> {
        let mut stats = RepoStats::default();
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            stats.total_size += size;
            stats.file_count += 1;
            if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
                *stats.language_breakdown.entry(ext.to_lowercase()).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }
}
