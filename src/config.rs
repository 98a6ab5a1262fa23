//! Layered configuration (§6.1): compiled-in defaults, an optional YAML file
//! (shape only — loading a concrete file from disk is out of scope per §1, so
//! [`Config::from_yaml_str`] exists but no CLI flag drives it here), then
//! process-variable overrides. Precedence for model selection per node is
//! `model_<node_name>` (config or process-variable) > the task-type
//! preference (`model_by_task`) > the global default model — mirrored from
//! how TuitBot layers `toml` config with environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::error::ConfigError;

fn default_cache_dir() -> String {
    ".repo-atlas-cache".to_string()
}

fn default_max_concurrent_llm_calls() -> usize {
    4
}

fn default_max_regeneration_attempts() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub cache_dir: String,
    pub max_concurrent_llm_calls: usize,
    pub max_regeneration_attempts: usize,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_concurrent_llm_calls: default_max_concurrent_llm_calls(),
            max_regeneration_attempts: default_max_regeneration_attempts(),
            log_level: default_log_level(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_global_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_circuit_breaker_threshold() -> f64 {
    0.5
}

fn default_token_budget() -> usize {
    8192
}

fn default_cache_ttl_seconds() -> u64 {
    24 * 3600
}

fn default_temperatures() -> HashMap<String, f32> {
    let mut map = HashMap::new();
    map.insert("overall_architecture".to_string(), 0.3);
    map.insert("api_docs".to_string(), 0.1);
    map.insert("dependency".to_string(), 0.1);
    map.insert("timeline".to_string(), 0.4);
    map.insert("glossary".to_string(), 0.2);
    map.insert("quick_look".to_string(), 0.5);
    map.insert("module_details".to_string(), 0.2);
    map
}

/// Per-node model overrides, keyed by node name (`model_<node_name>` in the
/// process-variable surface, §6.2).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub default_model: String,
    pub base_url: String,
    pub token_budget: usize,
    pub circuit_breaker_threshold: f64,
    pub temperature_by_task: HashMap<String, f32>,
    pub model_overrides: HashMap<String, String>,
    /// Preferred models per task type, most-preferred first (§6.1's middle
    /// precedence tier). The first entry is the task's preferred model; the
    /// remaining entries are the fallback chain a call through that model
    /// draws on once retries on the primary are exhausted (§4.3 step 7).
    pub model_by_task: HashMap<String, Vec<String>>,
}

impl LlmConfig {
    fn with_defaults() -> Self {
        Self {
            default_model: default_global_model(),
            base_url: default_base_url(),
            token_budget: default_token_budget(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            temperature_by_task: default_temperatures(),
            model_overrides: HashMap::new(),
            model_by_task: HashMap::new(),
        }
    }

    /// Resolves the per-node model override, if any (tier one of §6.1's
    /// precedence). `None` means the caller should defer to the task-type
    /// preference, then the global default.
    pub fn model_for_node(&self, node_name: &str) -> Option<&str> {
        self.model_overrides.get(node_name).map(String::as_str)
    }

    /// Tier two: the task type's preferred model, if one is configured.
    pub fn preferred_model_for_task(&self, task_type: &str) -> Option<&str> {
        self.model_by_task.get(task_type).and_then(|models| models.first()).map(String::as_str)
    }

    /// The fallback chain for `task_type` once `primary` (whichever model
    /// tier one/two/three resolved to) has exhausted its retries: every
    /// configured model for the task except `primary` itself, in order.
    pub fn fallback_models_for_task(&self, task_type: &str, primary: &str) -> Vec<String> {
        self.model_by_task
            .get(task_type)
            .map(|models| models.iter().filter(|m| m.as_str() != primary).cloned().collect())
            .unwrap_or_default()
    }

    pub fn temperature_for_task(&self, task: &str) -> f32 {
        self.temperature_by_task.get(task).copied().unwrap_or(0.3)
    }
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ]
}

fn default_binary_extensions() -> Vec<String> {
    vec![
        "png".to_string(),
        "jpg".to_string(),
        "jpeg".to_string(),
        "gif".to_string(),
        "ico".to_string(),
        "zip".to_string(),
        "tar".to_string(),
        "gz".to_string(),
        "pdf".to_string(),
        "so".to_string(),
        "dll".to_string(),
        "exe".to_string(),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub ignore_patterns: Vec<String>,
    pub binary_extensions: Vec<String>,
    pub cache_ttl_seconds: u64,
    pub clone_depth: Option<u32>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            binary_extensions: default_binary_extensions(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            clone_depth: Some(1),
        }
    }
}

fn default_max_file_size_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_chunk_size_chars() -> usize {
    1000
}

fn default_chunk_overlap_chars() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    pub max_file_size_bytes: u64,
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            chunk_size_chars: default_chunk_size_chars(),
            chunk_overlap_chars: default_chunk_overlap_chars(),
        }
    }
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_degraded_score() -> f64 {
    0.4
}

/// The seven `ContentQualityCheck` dimensions (§4.5), equally weighted by
/// default.
pub const QUALITY_DIMENSIONS: [&str; 7] = [
    "completeness",
    "accuracy",
    "readability",
    "formatting",
    "visualization",
    "educational_value",
    "practicality",
];

fn default_quality_weights() -> HashMap<String, f64> {
    QUALITY_DIMENSIONS
        .iter()
        .map(|dimension| (dimension.to_string(), 1.0 / QUALITY_DIMENSIONS.len() as f64))
        .collect()
}

fn default_max_modules_per_batch() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub dimension_weights: HashMap<String, f64>,
    pub acceptance_threshold: f64,
    pub degraded_score: f64,
    pub auto_regenerate: bool,
    pub max_regeneration_attempts: usize,
    pub max_modules_per_batch: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            dimension_weights: default_quality_weights(),
            acceptance_threshold: default_quality_threshold(),
            degraded_score: default_degraded_score(),
            auto_regenerate: true,
            max_regeneration_attempts: default_max_regeneration_attempts(),
            max_modules_per_batch: default_max_modules_per_batch(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MermaidConfig {
    pub max_regeneration_attempts: usize,
    pub backup_invalid_charts: bool,
}

impl Default for MermaidConfig {
    fn default() -> Self {
        Self {
            max_regeneration_attempts: default_max_regeneration_attempts(),
            backup_invalid_charts: false,
        }
    }
}

/// The composed configuration consumed by the pipeline. Loaded in three
/// layers: [`Config::default`], an optional YAML overlay
/// ([`Config::from_yaml_str`] + merge), then process-variable overrides
/// ([`Config::apply_env_overrides`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub llm: LlmConfig,
    pub repo: RepoConfig,
    pub parse: ParseConfig,
    pub quality: QualityConfig,
    pub mermaid: MermaidConfig,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            global: GlobalConfig::default(),
            llm: LlmConfig::with_defaults(),
            repo: RepoConfig::default(),
            parse: ParseConfig::default(),
            quality: QualityConfig::default(),
            mermaid: MermaidConfig::default(),
        }
    }

    /// Parses a YAML document into a full [`Config`], layering it over
    /// compiled-in defaults so a partial override file is valid input.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::defaults();
        let overlay: Config = serde_yaml::from_str(yaml)?;
        config.merge(overlay);
        Ok(config)
    }

    /// Merges `overlay` on top of `self`, field by field, at section
    /// granularity — a YAML file only specifying `llm.default_model` still
    /// inherits every other default untouched.
    pub fn merge(&mut self, overlay: Config) {
        if overlay.global != GlobalConfig::default() {
            self.global = overlay.global;
        }
        if overlay.llm.default_model != default_global_model()
            || !overlay.llm.model_overrides.is_empty()
            || !overlay.llm.model_by_task.is_empty()
        {
            self.llm = overlay.llm;
        }
        if overlay.repo != RepoConfig::default() {
            self.repo = overlay.repo;
        }
        if overlay.parse != ParseConfig::default() {
            self.parse = overlay.parse;
        }
        if overlay.quality != QualityConfig::default() {
            self.quality = overlay.quality;
        }
        if overlay.mermaid != MermaidConfig::default() {
            self.mermaid = overlay.mermaid;
        }
    }

    /// Applies process-variable overrides on top of whatever layer came
    /// before (§6.2): a unified `REPO_ATLAS_BASE_URL` wins over any
    /// provider-specific legacy variable when both are set, and
    /// `REPO_ATLAS_MODEL_<NODE_NAME>` overrides that node's model.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = env::var("REPO_ATLAS_BASE_URL") {
            self.llm.base_url = base_url;
        } else if let Ok(legacy) = env::var("OPENAI_BASE_URL") {
            self.llm.base_url = legacy;
        }

        if let Ok(model) = env::var("REPO_ATLAS_MODEL") {
            self.llm.default_model = model;
        }

        for (key, value) in env::vars() {
            if let Some(node_name) = key.strip_prefix("REPO_ATLAS_MODEL_") {
                self.llm
                    .model_overrides
                    .insert(node_name.to_lowercase(), value);
            }
        }

        if let Ok(cache_dir) = env::var("REPO_ATLAS_CACHE_DIR") {
            self.global.cache_dir = cache_dir;
        }
    }

    /// Resolves the required LLM API key from the process environment
    /// (§6.2): never stored on `Config` itself so it can't leak into a
    /// serialized `report.json`.
    pub fn llm_api_key() -> Result<String, ConfigError> {
        env::var("REPO_ATLAS_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| ConfigError::MissingVariable("REPO_ATLAS_API_KEY".to_string()))
    }

    /// Loads the full three-layer configuration; `yaml` is the optional
    /// overlay document's contents, already read from wherever a caller
    /// chooses to source it.
    pub fn load(yaml: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match yaml {
            Some(text) => Self::from_yaml_str(text)?,
            None => Self::defaults(),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}
