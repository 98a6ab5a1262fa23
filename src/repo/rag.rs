//! `PrepareRAGData` (§4.4.5): chunks non-binary source files into bounded
//! text fragments for retrieval, preferring paragraph or function boundaries
//! over a hard character cut so a chunk rarely splits mid-statement.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::action::Action;
use crate::config::ParseConfig;
use crate::node::{ExecutionContext, NodeBackend, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::{Chunk, FileEntry};

pub struct PrepareRAGDataNode {
    pub local_repo_root: Option<PathBuf>,
    pub parse_config: ParseConfig,
}

#[async_trait]
impl NodeBackend<InMemoryStorage> for PrepareRAGDataNode {
    type Prep = (Vec<FileEntry>, PathBuf);
    type Exec = Vec<Chunk>;

    fn name(&self) -> &str {
        "prepare_rag_data"
    }

    async fn prep(&self, store: &Store<InMemoryStorage>) -> Result<Self::Prep, NodeError> {
        let entries: Vec<FileEntry> = store.require(keys::CODE_STRUCTURE)?;
        let root = match &self.local_repo_root {
            Some(root) => root.clone(),
            None => PathBuf::from(store.require::<String>(keys::LOCAL_REPO_PATH)?),
        };
        Ok((entries, root))
    }

    async fn exec(&self, (entries, root): &Self::Prep, _ctx: &ExecutionContext) -> Result<Self::Exec, NodeError> {
        let mut chunks = Vec::new();
        for entry in entries {
            if entry.is_binary || entry.language == "unknown" {
                continue;
            }
            let path = resolve_path(root, &entry.path);
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(_) => continue,
            };
            chunks.extend(chunk_text(
                &entry.path,
                &text,
                self.parse_config.chunk_size_chars,
                self.parse_config.chunk_overlap_chars,
            ));
        }
        Ok(chunks)
    }

    async fn post(
        &self,
        store: &mut Store<InMemoryStorage>,
        _prep: Self::Prep,
        chunks: Self::Exec,
    ) -> Result<Action, NodeError> {
        store.put(keys::RAG_CHUNKS, &chunks)?;
        Ok(Action::default_action())
    }
}

fn resolve_path(root: &std::path::Path, entry_path: &str) -> PathBuf {
    let candidate = PathBuf::from(entry_path);
    if candidate.is_absolute() {
        candidate
    } else {
        root.join(entry_path)
    }
}

fn chunk_id(source_path: &str, start: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(start.to_le_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Splits `text` into chunks of at most `chunk_size` characters, each
/// overlapping the previous by `overlap` characters. Cut points prefer a
/// blank-line (paragraph) or brace-closing (function) boundary within the
/// trailing quarter of the window; a hard cut is the last resort.
fn chunk_text(source_path: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let window_end = (start + chunk_size).min(len);
        let end = if window_end == len {
            window_end
        } else {
            find_boundary(&chars, start, window_end).unwrap_or(window_end)
        };

        let slice: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            id: chunk_id(source_path, start),
            source_path: source_path.to_string(),
            byte_range: (start, end),
            text: slice,
            embedding: None,
        });

        if end >= len {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Looks backward from `window_end` for a blank line or a line that is just
/// a closing brace, within the last 25% of `[start, window_end)`.
fn find_boundary(chars: &[char], start: usize, window_end: usize) -> Option<usize> {
    let search_floor = start + (window_end - start) * 3 / 4;
    let mut i = window_end;
    while i > search_floor {
        i -= 1;
        if chars[i] == '\n' {
            let line_start = chars[..i].iter().rposition(|c| *c == '\n').map(|p| p + 1).unwrap_or(0);
            let line: String = chars[line_start..i].iter().collect();
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == "}" || trimmed == "end" {
                return Some(i + 1);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_produces_a_single_chunk() {
        let chunks = chunk_text("a.rs", "fn main() {}", 2000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_range, (0, 12));
    }

    #[test]
    fn long_text_splits_with_overlap() {
        let body = "x".repeat(5000);
        let chunks = chunk_text("a.rs", &body, 2000, 200);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            assert!(pair[1].byte_range.0 < pair[0].byte_range.1);
        }
    }

    #[test]
    fn prefers_blank_line_boundary_over_hard_cut() {
        let mut body = "a".repeat(1500);
        body.push_str("\n\n");
        body.push_str(&"b".repeat(1500));
        let chunks = chunk_text("a.rs", &body, 1600, 100);
        let first_end = chunks[0].byte_range.1;
        assert!(first_end <= 1502);
    }
}
