//! `ParseCodeBatch` (§4.4.2): walks the working tree honoring ignore
//! patterns and binary extensions, batches files, and extracts a
//! [`FileEntry`] per file plus the aggregated module dependency graph.

use async_trait::async_trait;
use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::action::Action;
use crate::batch::{BatchMode, BatchNodeBackend};
use crate::config::{ParseConfig, RepoConfig};
use crate::node::{ExecutionContext, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::{DependencyGraph, FileEntry};

fn detect_language(path: &Path, bytes: &[u8]) -> Option<String> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if let Some(lang) = language_from_extension(ext) {
            return Some(lang.to_string());
        }
    }
    if let Some(first_line) = bytes.split(|b| *b == b'\n').next() {
        if let Ok(text) = std::str::from_utf8(first_line) {
            if let Some(lang) = language_from_shebang(text) {
                return Some(lang.to_string());
            }
        }
    }
    None
}

fn language_from_extension(ext: &str) -> Option<&'static str> {
    Some(match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        _ => return None,
    })
}

fn language_from_shebang(first_line: &str) -> Option<&'static str> {
    if !first_line.starts_with("#!") {
        return None;
    }
    if first_line.contains("python") {
        Some("python")
    } else if first_line.contains("node") {
        Some("javascript")
    } else if first_line.contains("bash") || first_line.contains("/sh") {
        Some("shell")
    } else {
        None
    }
}

/// Sniffs the first 8KiB of `bytes` for a null byte, the heuristic §4.4.2
/// specifies for binaries the extension table missed.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}

fn is_ignored(path: &Path, root: &Path, patterns: &[Pattern]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    patterns.iter().any(|pattern| pattern.matches_path(relative))
}

fn extract_imports(language: &str, text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            match language {
                "rust" if trimmed.starts_with("use ") => Some(trimmed.trim_start_matches("use ").trim_end_matches(';').to_string()),
                "python" if trimmed.starts_with("import ") || trimmed.starts_with("from ") => Some(trimmed.to_string()),
                "javascript" | "typescript" if trimmed.starts_with("import ") || trimmed.starts_with("require(") => {
                    Some(trimmed.to_string())
                }
                "go" if trimmed.starts_with("import ") => Some(trimmed.to_string()),
                _ => None,
            }
        })
        .take(64)
        .collect()
}

fn extract_exported_symbols(language: &str, text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            match language {
                "rust" if trimmed.starts_with("pub fn ") || trimmed.starts_with("pub struct ") || trimmed.starts_with("pub enum ") => {
                    Some(trimmed.split_whitespace().nth(2)?.trim_end_matches(['(', '{', '<']).to_string())
                }
                "python" if trimmed.starts_with("def ") || trimmed.starts_with("class ") => {
                    Some(trimmed.split_whitespace().nth(1)?.trim_end_matches(['(', ':']).to_string())
                }
                _ => None,
            }
        })
        .take(64)
        .collect()
}

fn leading_comment_summary(text: &str) -> Option<String> {
    let first = text.lines().find(|l| !l.trim().is_empty())?;
    let trimmed = first.trim();
    if trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with("/*") || trimmed.starts_with("\"\"\"") {
        Some(trimmed.trim_start_matches(['/', '#', '*', '"']).trim().to_string())
    } else {
        None
    }
}

pub struct ParseCodeBatchNode {
    pub repo_config: RepoConfig,
    pub parse_config: ParseConfig,
}

#[async_trait]
impl BatchNodeBackend<InMemoryStorage> for ParseCodeBatchNode {
    type Item = PathBuf;
    type Output = FileEntry;

    fn name(&self) -> &str {
        "parse_code_batch"
    }

    async fn prep_items(&self, store: &Store<InMemoryStorage>) -> Result<Vec<PathBuf>, NodeError> {
        let local_path: String = store.require(keys::LOCAL_REPO_PATH)?;
        let root = PathBuf::from(local_path);
        let patterns: Vec<Pattern> = self
            .repo_config
            .ignore_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();

        let mut items = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().to_path_buf();
            if is_ignored(&path, &root, &patterns) {
                continue;
            }
            items.push(path);
        }
        Ok(items)
    }

    async fn exec_item(&self, path: &PathBuf, _ctx: &ExecutionContext) -> Result<FileEntry, NodeError> {
        let bytes = std::fs::read(path).map_err(|e| NodeError::Exec {
            attempts: 1,
            message: format!("failed to read {}: {e}", path.display()),
        })?;

        let binary_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.repo_config.binary_extensions.iter().any(|b| b.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);

        let is_binary = binary_ext || looks_binary(&bytes);
        let language = detect_language(path, &bytes).unwrap_or_else(|| "unknown".to_string());

        if is_binary || language == "unknown" {
            return Ok(FileEntry {
                path: path.display().to_string(),
                language,
                size_bytes: bytes.len() as u64,
                is_binary,
                ast_summary: None,
                imports: Vec::new(),
                exported_symbols: Vec::new(),
            });
        }

        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(FileEntry {
            path: path.display().to_string(),
            language: language.clone(),
            size_bytes: bytes.len() as u64,
            is_binary: false,
            ast_summary: leading_comment_summary(&text),
            imports: extract_imports(&language, &text),
            exported_symbols: extract_exported_symbols(&language, &text),
        })
    }

    async fn post_batch(
        &self,
        store: &mut Store<InMemoryStorage>,
        results: Vec<Result<FileEntry, NodeError>>,
    ) -> Result<Action, NodeError> {
        let mut entries = Vec::new();
        for result in results {
            match result {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    store.push_error(crate::types::ErrorRecord::new(
                        self.name(),
                        crate::types::ErrorKind::Warning,
                        err.to_string(),
                    ))?;
                }
            }
        }

        let mut graph = DependencyGraph::default();
        for entry in &entries {
            let module = module_name_for(&entry.path);
            graph.node_id(&module);
            for import in &entry.imports {
                let target = resolve_import_target(import, &entries);
                graph.add_edge(&module, &target);
            }
        }
        graph.detect_cycles();

        store.put(keys::CODE_STRUCTURE, &entries)?;
        store.put(keys::DEPENDENCIES, &graph)?;
        Ok(Action::default_action())
    }

    fn mode(&self) -> BatchMode {
        BatchMode::Parallel { width: 8 }
    }

    fn fail_fast(&self) -> bool {
        false
    }
}

fn module_name_for(path: &str) -> String {
    PathBuf::from(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn resolve_import_target(import: &str, entries: &[FileEntry]) -> String {
    let candidate = import
        .trim_start_matches("import ")
        .trim_start_matches("from ")
        .trim_start_matches("use ")
        .split(|c: char| c == ' ' || c == ':' || c == '.')
        .find(|segment| !segment.is_empty())
        .unwrap_or("");

    entries
        .iter()
        .map(|entry| module_name_for(&entry.path))
        .find(|name| name.eq_ignore_ascii_case(candidate))
        .unwrap_or_else(|| DependencyGraph::EXTERNAL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rust_by_extension() {
        assert_eq!(detect_language(Path::new("x.rs"), b"fn main() {}"), Some("rust".to_string()));
    }

    #[test]
    fn detects_python_by_shebang_when_extensionless() {
        let bytes = b"#!/usr/bin/env python\nprint('hi')";
        assert_eq!(detect_language(Path::new("script"), bytes), Some("python".to_string()));
    }

    #[test]
    fn binary_sniff_finds_null_byte() {
        assert!(looks_binary(&[0x00, 0x01, 0x02]));
        assert!(!looks_binary(b"just text"));
    }

    #[test]
    fn unknown_imports_resolve_to_external_node() {
        let entries = vec![FileEntry {
            path: "src/lib.rs".to_string(),
            language: "rust".to_string(),
            size_bytes: 0,
            is_binary: false,
            ast_summary: None,
            imports: vec![],
            exported_symbols: vec![],
        }];
        assert_eq!(resolve_import_target("use some_unknown_crate::Thing", &entries), "external");
    }
}
