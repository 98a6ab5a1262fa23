//! `AIUnderstandCoreModules` (§4.4.4): sends the pruned code structure and
//! dependency graph to the LLM, parses the result into `ModuleDescriptor`s
//! plus an architecture summary, scores the response, and regenerates with a
//! refined prompt when the score is too low. Exhausting retries falls back
//! to a structure-only heuristic rather than failing the run.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

use crate::action::Action;
use crate::llm::{GenerateRequest, LlmClient};
use crate::node::{ExecutionContext, NodeBackend, NodeError};
use crate::storage::InMemoryStorage;
use crate::store::{keys, Store};
use crate::types::{DependencyGraph, ErrorKind, ErrorRecord, FileEntry, ModuleDescriptor};

pub struct AIUnderstandCoreModulesNode {
    pub llm: Arc<LlmClient>,
    pub retry_count: usize,
    pub quality_threshold: f64,
    pub degraded_score: f64,
}

pub struct UnderstandPrep {
    code_structure: Vec<FileEntry>,
    dependencies: DependencyGraph,
    target_language: String,
}

pub struct UnderstandOutput {
    modules: Vec<ModuleDescriptor>,
    architecture_summary: String,
    quality_score: f64,
    degraded_reason: Option<String>,
    dropped_modules: Vec<String>,
}

#[async_trait]
impl NodeBackend<InMemoryStorage> for AIUnderstandCoreModulesNode {
    type Prep = UnderstandPrep;
    type Exec = UnderstandOutput;

    fn name(&self) -> &str {
        "ai_understand_core_modules"
    }

    async fn prep(&self, store: &Store<InMemoryStorage>) -> Result<UnderstandPrep, NodeError> {
        Ok(UnderstandPrep {
            code_structure: store.require(keys::CODE_STRUCTURE)?,
            dependencies: store.require(keys::DEPENDENCIES)?,
            target_language: store.get_or(keys::TARGET_LANGUAGE, "en".to_string())?,
        })
    }

    async fn exec(&self, prep: &UnderstandPrep, _ctx: &ExecutionContext) -> Result<UnderstandOutput, NodeError> {
        let mut best: Option<(Vec<ModuleDescriptor>, String, f64, Vec<String>)> = None;

        for attempt in 0..=self.retry_count {
            let prompt = build_prompt(&prep.code_structure, &prep.dependencies, attempt);
            let request = GenerateRequest {
                prompt,
                context: None,
                task_type: "understand_code".to_string(),
                target_language: prep.target_language.clone(),
                model_override: self.llm.model_override_for_node(self.name()),
            };

            let now = chrono::Utc::now().timestamp();
            let response = match self.llm.generate(request, now).await {
                Ok((text, _, _)) => text,
                Err(_) => continue,
            };

            let (modules, dropped) = parse_modules(&response, &prep.code_structure);
            let summary = extract_summary(&response);
            let score = quality_score(&response, &modules);

            if best.as_ref().map(|(_, _, s, _)| score > *s).unwrap_or(true) {
                best = Some((modules.clone(), summary.clone(), score, dropped.clone()));
            }

            if score >= self.quality_threshold {
                return Ok(UnderstandOutput {
                    modules,
                    architecture_summary: summary,
                    quality_score: score,
                    degraded_reason: None,
                    dropped_modules: dropped,
                });
            }
        }

        if let Some((modules, summary, score, dropped)) = best {
            if score > 0.0 {
                return Ok(UnderstandOutput {
                    modules,
                    architecture_summary: summary,
                    quality_score: score,
                    degraded_reason: Some("quality threshold not reached after retries".to_string()),
                    dropped_modules: dropped,
                });
            }
        }

        let (modules, summary) = degraded_fallback(&prep.code_structure);
        let (modules, dropped) = filter_resolvable(modules, &prep.code_structure);
        Ok(UnderstandOutput {
            modules,
            architecture_summary: summary,
            quality_score: self.degraded_score,
            degraded_reason: Some(format!(
                "LLM understand_code failed or returned unparseable output after {} attempt(s); used structure-only fallback",
                self.retry_count + 1
            )),
            dropped_modules: dropped,
        })
    }

    async fn post(
        &self,
        store: &mut Store<InMemoryStorage>,
        _prep: UnderstandPrep,
        exec: UnderstandOutput,
    ) -> Result<Action, NodeError> {
        store.put(keys::CORE_MODULES, &exec.modules)?;
        store
            .set_raw(
                keys::ARCHITECTURE_SUMMARY,
                serde_json::Value::String(exec.architecture_summary),
            )
            .map_err(NodeError::from)?;
        store.put(&keys::quality_score("ai_understand"), &exec.quality_score)?;

        for dropped_name in exec.dropped_modules {
            store.push_error(ErrorRecord::new(
                self.name(),
                ErrorKind::Warning,
                format!("dropped module descriptor '{dropped_name}': path did not resolve to any code_structure entry"),
            ))?;
        }

        if let Some(reason) = exec.degraded_reason {
            store.push_error(ErrorRecord::new(self.name(), ErrorKind::Warning, reason).with_retry_count(self.retry_count))?;
        }

        Ok(Action::default_action())
    }
}

fn build_prompt(structure: &[FileEntry], dependencies: &DependencyGraph, attempt: usize) -> String {
    let file_list: Vec<&str> = structure.iter().map(|f| f.path.as_str()).take(200).collect();
    let base = format!(
        "Given these files: {:?}\nAnd these module dependency edges: {:?}\nDescribe the core modules (name, path, description, importance 1-10, dependencies) and a short architecture summary. Prefer a JSON array under key 'modules' plus a 'summary' field.",
        file_list, dependencies.edges
    );
    if attempt == 0 {
        base
    } else {
        format!("{base}\n\nThe previous response did not meet quality expectations; be more complete, be more specific about structure, and use precise relational vocabulary (depends on, calls, owns).")
    }
}

/// Accepts JSON, YAML, or structured Markdown; falls back to a heuristic
/// regex extractor over bullet lists (§4.4.4). Every returned descriptor's
/// path resolves to a `code_structure` entry; anything that doesn't is
/// dropped and its name is returned alongside for a warning to be recorded.
fn parse_modules(response: &str, structure: &[FileEntry]) -> (Vec<ModuleDescriptor>, Vec<String>) {
    let modules = if let Ok(value) = serde_json::from_str::<serde_json::Value>(response) {
        parse_modules_from_json(&value, structure)
    } else {
        None
    }
    .or_else(|| serde_yaml::from_str::<serde_json::Value>(response).ok().and_then(|value| parse_modules_from_json(&value, structure)))
    .unwrap_or_else(|| heuristic_extract(response, structure));

    filter_resolvable(modules, structure)
}

/// Drops any descriptor whose `path` doesn't resolve to an exact
/// `code_structure` entry or a directory prefix of one — the latter keeps
/// `degraded_fallback`'s directory-style module paths valid.
fn filter_resolvable(modules: Vec<ModuleDescriptor>, structure: &[FileEntry]) -> (Vec<ModuleDescriptor>, Vec<String>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for module in modules {
        if path_resolves(&module.path, structure) {
            kept.push(module);
        } else {
            dropped.push(module.name);
        }
    }
    (kept, dropped)
}

fn path_resolves(path: &str, structure: &[FileEntry]) -> bool {
    structure.iter().any(|f| f.path == path || is_directory_prefix(path, &f.path))
}

fn is_directory_prefix(dir: &str, file_path: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return false;
    }
    file_path.strip_prefix(dir).map(|rest| rest.starts_with('/')).unwrap_or(false)
}

fn parse_modules_from_json(value: &serde_json::Value, structure: &[FileEntry]) -> Option<Vec<ModuleDescriptor>> {
    let modules_value = value.get("modules")?.as_array()?;
    let mut modules = Vec::new();
    for entry in modules_value {
        let name = entry.get("name")?.as_str()?.to_string();
        let path = entry
            .get("path")
            .and_then(|p| p.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| resolve_path_for_module(&name, structure));
        let description = entry
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("")
            .to_string();
        let importance = entry.get("importance").and_then(|i| i.as_u64()).unwrap_or(5) as u8;
        let depends_on = entry
            .get("dependencies")
            .and_then(|d| d.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        modules.push(ModuleDescriptor {
            name,
            path,
            description,
            importance,
            depends_on,
        });
    }
    Some(modules)
}

fn resolve_path_for_module(name: &str, structure: &[FileEntry]) -> String {
    structure
        .iter()
        .find(|f| f.path.contains(name))
        .map(|f| f.path.clone())
        .unwrap_or_else(|| name.to_string())
}

fn heuristic_extract(response: &str, structure: &[FileEntry]) -> Vec<ModuleDescriptor> {
    let bullet = Regex::new(r"^[-*]\s+(.+)$").expect("static regex is valid");
    let mut modules = Vec::new();
    for line in response.lines() {
        if let Some(captures) = bullet.captures(line.trim()) {
            let text = captures.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
            let name = text.split(':').next().unwrap_or(&text).trim().to_string();
            if name.is_empty() {
                continue;
            }
            modules.push(ModuleDescriptor {
                path: resolve_path_for_module(&name, structure),
                description: text,
                importance: 5,
                depends_on: Vec::new(),
                name,
            });
        }
    }
    modules
}

fn extract_summary(response: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(response) {
        if let Some(summary) = value.get("summary").and_then(|s| s.as_str()) {
            return summary.to_string();
        }
    }
    response.lines().take(3).collect::<Vec<_>>().join(" ")
}

/// `(completeness × 0.4) + (structure indicators × 0.4) + (relational vocabulary × 0.2)`.
fn quality_score(response: &str, modules: &[ModuleDescriptor]) -> f64 {
    let completeness = (modules.len() as f64 / 5.0).min(1.0);
    let has_structure_markers = response.contains('{') || response.contains('#') || response.contains('-');
    let structure = if has_structure_markers { 1.0 } else { 0.0 };
    let relational_terms = ["depends on", "calls", "owns", "imports", "uses"];
    let relational_hits = relational_terms.iter().filter(|term| response.to_lowercase().contains(*term)).count();
    let relational = (relational_hits as f64 / relational_terms.len() as f64).min(1.0);
    completeness * 0.4 + structure * 0.4 + relational * 0.2
}

/// Enumerates directories containing a package marker (`__init__`-style or a
/// main-named entry file) and describes file-type distribution.
fn degraded_fallback(structure: &[FileEntry]) -> (Vec<ModuleDescriptor>, String) {
    use std::collections::BTreeSet;

    let mut package_dirs: BTreeSet<String> = BTreeSet::new();
    for entry in structure {
        let path = std::path::Path::new(&entry.path);
        let file_name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        if file_name == "__init__" || file_name == "mod" || file_name.starts_with("main") || file_name == "index" {
            if let Some(parent) = path.parent() {
                package_dirs.insert(parent.display().to_string());
            }
        }
    }

    let mut language_counts = std::collections::BTreeMap::new();
    for entry in structure {
        *language_counts.entry(entry.language.clone()).or_insert(0usize) += 1;
    }

    let modules = package_dirs
        .iter()
        .map(|dir| ModuleDescriptor {
            name: dir.rsplit('/').next().unwrap_or(dir).to_string(),
            path: dir.clone(),
            description: "Detected via package-marker heuristic (degraded mode).".to_string(),
            importance: 3,
            depends_on: Vec::new(),
        })
        .collect();

    let summary = format!(
        "Degraded structural summary: {} files across languages {:?}.",
        structure.len(),
        language_counts
    );

    (modules, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_structure() -> Vec<FileEntry> {
        vec![
            FileEntry {
                path: "src/auth/mod.rs".to_string(),
                language: "rust".to_string(),
                size_bytes: 100,
                is_binary: false,
                ast_summary: None,
                imports: vec![],
                exported_symbols: vec![],
            },
            FileEntry {
                path: "src/main.rs".to_string(),
                language: "rust".to_string(),
                size_bytes: 50,
                is_binary: false,
                ast_summary: None,
                imports: vec![],
                exported_symbols: vec![],
            },
        ]
    }

    #[test]
    fn parses_json_response_into_modules() {
        let response = r#"{"modules":[{"name":"auth","path":"src/auth/mod.rs","description":"Handles auth","importance":8,"dependencies":["core"]}],"summary":"Simple layered app."}"#;
        let (modules, dropped) = parse_modules(response, &sample_structure());
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "auth");
        assert!(dropped.is_empty());
        assert_eq!(extract_summary(response), "Simple layered app.");
    }

    #[test]
    fn drops_a_module_whose_path_does_not_resolve_to_any_code_structure_entry() {
        let response = r#"{"modules":[{"name":"auth","path":"src/auth/mod.rs","description":"Handles auth","importance":8},{"name":"ghost","path":"src/nonexistent/mod.rs","description":"Made up","importance":3}],"summary":"Two modules."}"#;
        let (modules, dropped) = parse_modules(response, &sample_structure());
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "auth");
        assert_eq!(dropped, vec!["ghost".to_string()]);
    }

    #[test]
    fn falls_back_to_bullet_heuristic_on_unstructured_text() {
        let response = "Here is the structure:\n- auth: handles login\n- storage: persists data\n";
        let modules = heuristic_extract(response, &sample_structure());
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "auth");
    }

    #[test]
    fn degraded_fallback_finds_package_markers() {
        let (modules, summary) = degraded_fallback(&sample_structure());
        assert!(!modules.is_empty());
        assert!(summary.contains("Degraded"));
    }

    #[test]
    fn degraded_fallback_modules_all_resolve_as_directory_prefixes() {
        let (modules, summary) = degraded_fallback(&sample_structure());
        let (kept, dropped) = filter_resolvable(modules, &sample_structure());
        assert!(!kept.is_empty());
        assert!(dropped.is_empty(), "expected degraded_fallback's directory-style paths to all resolve, dropped: {dropped:?}, summary: {summary}");
    }
}
