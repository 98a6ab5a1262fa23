//! `AnalyzeHistory` (§4.4.3): reads up to `max_commits` commits in reverse
//! chronological order, derives per-author and timeline summaries, and asks
//! the LLM to turn that into a short narrative stored for the Timeline
//! generator.

use async_trait::async_trait;
use git2::Repository;
use std::collections::HashMap;
use std::sync::Arc;

use crate::action::Action;
use crate::llm::{GenerateRequest, LlmClient};
use crate::node::{ExecutionContext, NodeBackend, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::CommitRecord;

pub const HISTORY_SUMMARY_KEY: &str = "commit_history_summary";

pub struct AnalyzeHistoryNode {
    pub llm: Arc<LlmClient>,
    pub max_commits: usize,
    pub top_n_files: usize,
}

pub struct HistoryPrep {
    local_path: String,
    target_language: String,
}

#[async_trait]
impl NodeBackend<InMemoryStorage> for AnalyzeHistoryNode {
    type Prep = HistoryPrep;
    type Exec = (Vec<CommitRecord>, String);

    fn name(&self) -> &str {
        "analyze_history"
    }

    async fn prep(&self, store: &Store<InMemoryStorage>) -> Result<HistoryPrep, NodeError> {
        Ok(HistoryPrep {
            local_path: store.require(keys::LOCAL_REPO_PATH)?,
            target_language: store.get_or(keys::TARGET_LANGUAGE, "en".to_string())?,
        })
    }

    async fn exec(&self, prep: &HistoryPrep, _ctx: &ExecutionContext) -> Result<Self::Exec, NodeError> {
        let commits = self.walk_commits(&prep.local_path)?;
        let narrative = self.summarize(&commits, &prep.target_language).await?;
        Ok((commits, narrative))
    }

    async fn post(
        &self,
        store: &mut Store<InMemoryStorage>,
        _prep: HistoryPrep,
        (commits, narrative): Self::Exec,
    ) -> Result<Action, NodeError> {
        store.put(keys::COMMIT_HISTORY, &commits)?;
        store
            .set_raw(HISTORY_SUMMARY_KEY, serde_json::Value::String(narrative))
            .map_err(NodeError::from)?;
        Ok(Action::default_action())
    }
}

impl AnalyzeHistoryNode {
    fn walk_commits(&self, local_path: &str) -> Result<Vec<CommitRecord>, NodeError> {
        let repo = Repository::open(local_path).map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("failed to open git repository at {local_path}: {e}"),
        })?;

        let mut revwalk = repo.revwalk().map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("revwalk failed: {e}"),
        })?;
        revwalk.push_head().map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("revwalk push_head failed: {e}"),
        })?;
        revwalk.set_sorting(git2::Sort::TIME).ok();

        let mut commits = Vec::new();
        for oid in revwalk.take(self.max_commits) {
            let oid = match oid {
                Ok(oid) => oid,
                Err(_) => continue,
            };
            let commit = match repo.find_commit(oid) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let changed_files = diff_against_first_parent(&repo, &commit);
            let (insertions, deletions) = diff_stats(&repo, &commit);

            commits.push(CommitRecord {
                sha: oid.to_string(),
                author: commit.author().name().unwrap_or("unknown").to_string(),
                timestamp: commit.time().seconds(),
                subject: commit.summary().unwrap_or("").to_string(),
                changed_files,
                insertions,
                deletions,
            });
        }
        Ok(commits)
    }

    async fn summarize(&self, commits: &[CommitRecord], target_language: &str) -> Result<String, NodeError> {
        if commits.is_empty() {
            return Ok("No commit history available.".to_string());
        }

        let mut per_author: HashMap<String, usize> = HashMap::new();
        let mut per_bucket: HashMap<String, usize> = HashMap::new();
        let mut file_changes: HashMap<String, usize> = HashMap::new();

        for commit in commits {
            *per_author.entry(commit.author.clone()).or_insert(0) += 1;
            let bucket = year_quarter_bucket(commit.timestamp);
            *per_bucket.entry(bucket).or_insert(0) += 1;
            for file in &commit.changed_files {
                *file_changes.entry(file.clone()).or_insert(0) += 1;
            }
        }

        let mut top_files: Vec<(&String, &usize)> = file_changes.iter().collect();
        top_files.sort_by(|a, b| b.1.cmp(a.1));
        top_files.truncate(self.top_n_files);

        let prompt = format!(
            "Summarize this commit history into a short narrative.\nCommits analyzed: {}\nPer-author counts: {:?}\nPer-quarter counts: {:?}\nMost-changed files: {:?}",
            commits.len(),
            per_author,
            per_bucket,
            top_files,
        );

        let request = GenerateRequest {
            prompt,
            context: None,
            task_type: "summarize".to_string(),
            target_language: target_language.to_string(),
            model_override: self.llm.model_override_for_node(self.name()),
        };

        let now = chrono::Utc::now().timestamp();
        match self.llm.generate(request, now).await {
            Ok((text, _, _)) => Ok(text),
            Err(_) => Ok(format!(
                "{} commits from {} authors across {} quarters; most-changed files: {:?}",
                commits.len(),
                per_author.len(),
                per_bucket.len(),
                top_files
            )),
        }
    }
}

fn year_quarter_bucket(unix_seconds: i64) -> String {
    let datetime = chrono::DateTime::from_timestamp(unix_seconds, 0).unwrap_or_default();
    let quarter = (datetime.format("%m").to_string().parse::<u32>().unwrap_or(1) - 1) / 3 + 1;
    format!("{}-Q{}", datetime.format("%Y"), quarter)
}

fn diff_against_first_parent(repo: &Repository, commit: &git2::Commit) -> Vec<String> {
    let tree = commit.tree().ok();
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), tree.as_ref(), None);
    match diff {
        Ok(diff) => diff
            .deltas()
            .filter_map(|delta| delta.new_file().path().map(|p| p.display().to_string()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn diff_stats(repo: &Repository, commit: &git2::Commit) -> (usize, usize) {
    let tree = commit.tree().ok();
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
    match repo.diff_tree_to_tree(parent_tree.as_ref(), tree.as_ref(), None) {
        Ok(diff) => match diff.stats() {
            Ok(stats) => (stats.insertions(), stats.deletions()),
            Err(_) => (0, 0),
        },
        Err(_) => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_bucket_formats_as_year_dash_q() {
        let ts = chrono::NaiveDate::from_ymd_opt(2025, 8, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(year_quarter_bucket(ts), "2025-Q3");
    }
}
