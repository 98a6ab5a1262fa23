//! Provider-agnostic LLM call layer (§4.3): a single [`LlmClient::generate`]
//! entry point handles prompt assembly, token budgeting, caching, model
//! selection, retry/fallback, response validation, and metadata reporting.

pub mod cache;
pub mod provider;
pub mod tokenizer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::config::LlmConfig;
use crate::error::LlmError;
use cache::{cache_key, LlmCache};
use provider::{CompletionRequest, LlmProvider, ModelRef};
use tokenizer::Tokenizer;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub context: Option<String>,
    pub task_type: String,
    pub target_language: String,
    /// Explicit model override for this call (§6.1's `model_<node_name>`);
    /// falls back to the task-type preference, then the global default.
    pub model_override: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerateMetadata {
    pub provider: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub latency_ms: u64,
    pub attempt: usize,
    pub from_cache: bool,
    pub fallback_used: bool,
}

/// Sliding window of the last `WINDOW` outcomes for one provider (§4.3,
/// §5): opens once the failure ratio within the window exceeds the
/// configured threshold, then stays open for a fixed cool-down before
/// probing again.
struct CircuitBreaker {
    window: Vec<bool>,
    threshold: f64,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

const CIRCUIT_WINDOW: usize = 20;
const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

impl CircuitBreaker {
    fn new(threshold: f64) -> Self {
        Self {
            window: Vec::with_capacity(CIRCUIT_WINDOW),
            threshold,
            opened_at: None,
            cooldown: CIRCUIT_COOLDOWN,
        }
    }

    fn is_open(&mut self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) if now.duration_since(opened) < self.cooldown => true,
            Some(_) => {
                self.opened_at = None;
                false
            }
            None => false,
        }
    }

    fn record(&mut self, success: bool, now: Instant) {
        self.window.push(success);
        if self.window.len() > CIRCUIT_WINDOW {
            self.window.remove(0);
        }
        if self.window.len() == CIRCUIT_WINDOW {
            let failures = self.window.iter().filter(|ok| !**ok).count();
            let failure_ratio = failures as f64 / CIRCUIT_WINDOW as f64;
            if failure_ratio > self.threshold {
                self.opened_at = Some(now);
            }
        }
    }
}

fn temperature_for(task_type: &str, llm_config: &LlmConfig) -> f32 {
    llm_config.temperature_for_task(task_type)
}

fn is_transient(error: &LlmError) -> bool {
    matches!(error, LlmError::Request { .. } | LlmError::CircuitOpen { .. })
}

fn build_full_prompt(request: &GenerateRequest, context: &str) -> String {
    let instruction = task_instruction(&request.task_type);
    let language_directive = format!(
        "Respond in {}. Preserve code identifiers verbatim.",
        request.target_language
    );
    if context.is_empty() {
        format!("{instruction}\n\n{language_directive}\n\n{}", request.prompt)
    } else {
        format!(
            "{instruction}\n\n{language_directive}\n\n{}\n\nContext:\n{context}",
            request.prompt
        )
    }
}

fn task_instruction(task_type: &str) -> &'static str {
    match task_type {
        "summarize" => "Summarize the following material concisely and factually.",
        "explain" => "Explain the following material clearly, for an engineer unfamiliar with it.",
        "analyze" => "Analyze the following material and extract structured findings.",
        "understand_code" => "Analyze this codebase's structure and describe its modules and architecture.",
        "generate_content" => "Generate well-structured technical documentation from the following material.",
        _ => "Respond to the following request.",
    }
}

/// Minimum-length and structural-marker checks for a generated response
/// (§4.3 step 8).
fn validate_response(text: &str, task_type: &str) -> Result<(), LlmError> {
    const MIN_LENGTH: usize = 10;
    if text.trim().len() < MIN_LENGTH {
        return Err(LlmError::InvalidResponse {
            provider: "unknown".to_string(),
            reason: format!("response shorter than {MIN_LENGTH} characters"),
        });
    }
    if task_type == "understand_code" && !text.contains('{') && !text.contains('#') && !text.contains('-') {
        return Err(LlmError::InvalidResponse {
            provider: "unknown".to_string(),
            reason: "understand_code response has no recognizable structure (JSON, Markdown, or bullets)".to_string(),
        });
    }
    Ok(())
}

pub struct LlmClient {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    generic_provider: Arc<dyn LlmProvider>,
    cache: LlmCache,
    tokenizer: Tokenizer,
    config: LlmConfig,
    circuit_breakers: Mutex<HashMap<String, CircuitBreaker>>,
    semaphore: Arc<Semaphore>,
    cache_ttl_seconds: u64,
}

impl LlmClient {
    pub fn new(config: LlmConfig, cache_dir: impl AsRef<std::path::Path>, api_key: String, max_concurrent_llm_calls: usize) -> Self {
        let generic_provider: Arc<dyn LlmProvider> =
            Arc::new(provider::GenericHttpProvider::new(config.base_url.clone(), api_key));
        Self {
            providers: HashMap::new(),
            generic_provider,
            cache: LlmCache::new(cache_dir),
            tokenizer: Tokenizer::new(),
            config,
            circuit_breakers: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent_llm_calls.max(1))),
            cache_ttl_seconds: 24 * 3600,
        }
    }

    /// Registers a provider implementation for a specific provider prefix,
    /// overriding the generic HTTP fallback — used by tests to substitute a
    /// stub and would be used in production for a vendor needing bespoke
    /// request shaping.
    pub fn with_provider(mut self, prefix: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(prefix.into(), provider);
        self
    }

    fn provider_for(&self, model: &ModelRef) -> Arc<dyn LlmProvider> {
        self.providers
            .get(&model.provider)
            .cloned()
            .unwrap_or_else(|| self.generic_provider.clone())
    }

    /// The per-node `model_<node_name>` override, if `node_name` has one
    /// configured (§6.1's top precedence tier) — callers pass the result
    /// straight through as `GenerateRequest::model_override`.
    pub fn model_override_for_node(&self, node_name: &str) -> Option<String> {
        self.config.model_for_node(node_name).map(str::to_string)
    }

    /// Resolves the model for a request through §6.1's three tiers:
    /// the request's own override, then the task-type preference, then the
    /// global default.
    fn resolve_model(&self, request: &GenerateRequest) -> Result<ModelRef, LlmError> {
        let spec = request
            .model_override
            .clone()
            .or_else(|| self.config.preferred_model_for_task(&request.task_type).map(str::to_string))
            .unwrap_or_else(|| self.config.default_model.clone());
        ModelRef::parse(&spec)
    }

    /// Runs the full ten-step `generate` contract (§4.3).
    pub async fn generate(&self, request: GenerateRequest, now_unix: i64) -> Result<(String, bool, GenerateMetadata), LlmError> {
        let max_input_tokens = self.config.token_budget;
        let context = request.context.clone().unwrap_or_default();

        let full_prompt = build_full_prompt(&request, &context);
        let mut input_tokens = self.tokenizer.count(&full_prompt);

        let full_prompt = if input_tokens > max_input_tokens {
            let trimmed_context = self.tokenizer.truncate_to_budget(
                &context,
                max_input_tokens.saturating_sub(self.tokenizer.count(&build_full_prompt(&request, ""))),
            );
            let trimmed_prompt = build_full_prompt(&request, &trimmed_context);
            input_tokens = self.tokenizer.count(&trimmed_prompt);
            if input_tokens > max_input_tokens {
                return Err(LlmError::PromptTooLarge {
                    tokens: input_tokens,
                    budget: max_input_tokens,
                });
            }
            trimmed_prompt
        } else {
            full_prompt
        };

        let model = self.resolve_model(&request)?;
        let temperature = temperature_for(&request.task_type, &self.config);
        let max_tokens = self.config.token_budget;

        let key = cache_key(&full_prompt, &model.wire_model(), temperature, max_tokens);
        if let Some(entry) = self.cache.get(&key, now_unix) {
            return Ok((
                entry.response.clone(),
                true,
                GenerateMetadata {
                    provider: model.provider.clone(),
                    model: model.model.clone(),
                    input_tokens,
                    output_tokens: entry.output_tokens,
                    latency_ms: 0,
                    attempt: 0,
                    from_cache: true,
                    fallback_used: false,
                },
            ));
        }

        let (text, output_tokens, provider_used, attempt, fallback_used, latency_ms) = self
            .invoke_with_retry_and_fallback(&model, &full_prompt, temperature, max_tokens, &request.task_type)
            .await?;

        validate_response(&text, &request.task_type)?;

        let entry = crate::types::CacheEntry {
            key: key.clone(),
            response: text.clone(),
            model: model.wire_model(),
            input_tokens,
            output_tokens,
            created_at: now_unix,
            ttl_seconds: self.cache_ttl_seconds,
        };
        let _ = self.cache.put(&key, entry);

        Ok((
            text,
            false,
            GenerateMetadata {
                provider: provider_used,
                model: model.model,
                input_tokens,
                output_tokens,
                latency_ms,
                attempt,
                from_cache: false,
                fallback_used,
            },
        ))
    }

    /// Tries `model` with retries, then — if it still fails — each
    /// fallback model configured for `task_type` in turn (§4.3 step 7).
    /// `fallback_used` is true iff a model other than `model` is the one
    /// that actually produced the returned response.
    async fn invoke_with_retry_and_fallback(
        &self,
        model: &ModelRef,
        prompt: &str,
        temperature: f32,
        max_tokens: usize,
        task_type: &str,
    ) -> Result<(String, usize, String, usize, bool, u64), LlmError> {
        let fallback_specs = self.config.fallback_models_for_task(task_type, &model.spec());
        let mut candidates = vec![model.clone()];
        for spec in fallback_specs {
            match ModelRef::parse(&spec) {
                Ok(parsed) if parsed != *model => candidates.push(parsed),
                _ => {}
            }
        }

        let mut last_error = None;
        for (index, candidate) in candidates.iter().enumerate() {
            match self.invoke_with_retry(candidate, prompt, temperature, max_tokens, task_type).await {
                Ok((text, output_tokens, provider_used, attempt, latency_ms)) => {
                    return Ok((text, output_tokens, provider_used, attempt, index > 0, latency_ms));
                }
                Err(err) => last_error = Some(err),
            }
        }

        Err(last_error.unwrap_or(LlmError::Request {
            provider: model.provider.clone(),
            message: "exhausted retries with no recorded error".to_string(),
        }))
    }

    /// Retries a single model up to `RETRY_COUNT` times on transient errors,
    /// backing off exponentially between attempts (§4.3 step 6).
    async fn invoke_with_retry(
        &self,
        model: &ModelRef,
        prompt: &str,
        temperature: f32,
        max_tokens: usize,
        task_type: &str,
    ) -> Result<(String, usize, String, usize, u64), LlmError> {
        const RETRY_COUNT: usize = 3;

        if self.breaker_is_open(&model.provider) {
            return Err(LlmError::CircuitOpen {
                provider: model.provider.clone(),
            });
        }

        let system_prompt = Some(task_instruction(task_type).to_string());
        let request = CompletionRequest {
            model: model.clone(),
            system_prompt,
            user_prompt: prompt.to_string(),
            temperature,
            max_tokens,
        };

        let provider = self.provider_for(model);
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < RETRY_COUNT {
            attempt += 1;
            let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
            let started = Instant::now();
            match provider.complete(&request).await {
                Ok(response) => {
                    self.record_breaker_outcome(&model.provider, true);
                    let latency_ms = started.elapsed().as_millis() as u64;
                    return Ok((response.text, response.output_tokens, model.provider.clone(), attempt, latency_ms));
                }
                Err(err) => {
                    self.record_breaker_outcome(&model.provider, false);
                    let transient = is_transient(&err);
                    last_error = Some(err);
                    if !transient {
                        break;
                    }
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt as u32));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(last_error.unwrap_or(LlmError::Request {
            provider: model.provider.clone(),
            message: "exhausted retries with no recorded error".to_string(),
        }))
    }

    fn breaker_is_open(&self, provider: &str) -> bool {
        let mut breakers = self.circuit_breakers.lock().expect("circuit breaker lock poisoned");
        let breaker = breakers
            .entry(provider.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.circuit_breaker_threshold));
        breaker.is_open(Instant::now())
    }

    fn record_breaker_outcome(&self, provider: &str, success: bool) {
        let mut breakers = self.circuit_breakers.lock().expect("circuit breaker lock poisoned");
        let breaker = breakers
            .entry(provider.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.circuit_breaker_threshold));
        breaker.record(success, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        fail_times: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<provider::CompletionResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(LlmError::Request {
                    provider: "stub".to_string(),
                    message: "rate limited".to_string(),
                });
            }
            Ok(provider::CompletionResponse {
                text: "a sufficiently long generated response body".to_string(),
                output_tokens: 5,
            })
        }
    }

    fn client_with_stub(fail_times: usize) -> LlmClient {
        let dir = tempfile::tempdir().unwrap();
        let config = LlmConfig {
            default_model: "stub/model-a".to_string(),
            base_url: "http://localhost".to_string(),
            token_budget: 8192,
            circuit_breaker_threshold: 0.5,
            temperature_by_task: HashMap::new(),
            model_overrides: HashMap::new(),
            model_by_task: HashMap::new(),
        };
        let client = LlmClient::new(config, dir.path(), "test-key".to_string(), 4);
        client.with_provider(
            "stub",
            Arc::new(StubProvider {
                fail_times,
                calls: AtomicUsize::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn cache_hit_on_second_identical_call() {
        let client = client_with_stub(0);
        let request = GenerateRequest {
            prompt: "describe this".to_string(),
            context: None,
            task_type: "summarize".to_string(),
            target_language: "en".to_string(),
            model_override: None,
        };

        let (first_text, first_from_cache, _) = client.generate(request.clone(), 1000).await.unwrap();
        assert!(!first_from_cache);

        let (second_text, second_from_cache, _) = client.generate(request, 1000).await.unwrap();
        assert!(second_from_cache);
        assert_eq!(first_text, second_text);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let client = client_with_stub(2);
        let request = GenerateRequest {
            prompt: "describe this".to_string(),
            context: None,
            task_type: "summarize".to_string(),
            target_language: "en".to_string(),
            model_override: None,
        };

        let (_, _, metadata) = client.generate(request, 2000).await.unwrap();
        assert_eq!(metadata.attempt, 3);
    }

    struct AlwaysFailsProvider;

    #[async_trait]
    impl LlmProvider for AlwaysFailsProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<provider::CompletionResponse, LlmError> {
            Err(LlmError::Request {
                provider: "stub-a".to_string(),
                message: "permanently down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn falls_back_to_the_next_configured_model_once_the_primary_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut model_by_task = HashMap::new();
        model_by_task.insert(
            "summarize".to_string(),
            vec!["stub-a/model-a".to_string(), "stub-b/model-b".to_string()],
        );
        let config = LlmConfig {
            default_model: "stub-a/model-a".to_string(),
            base_url: "http://localhost".to_string(),
            token_budget: 8192,
            circuit_breaker_threshold: 0.5,
            temperature_by_task: HashMap::new(),
            model_overrides: HashMap::new(),
            model_by_task,
        };
        let client = LlmClient::new(config, dir.path(), "test-key".to_string(), 4)
            .with_provider("stub-a", Arc::new(AlwaysFailsProvider))
            .with_provider(
                "stub-b",
                Arc::new(StubProvider {
                    fail_times: 0,
                    calls: AtomicUsize::new(0),
                }),
            );

        let request = GenerateRequest {
            prompt: "describe this".to_string(),
            context: None,
            task_type: "summarize".to_string(),
            target_language: "en".to_string(),
            model_override: None,
        };

        let (_, _, metadata) = client.generate(request, 4000).await.unwrap();
        assert!(metadata.fallback_used);
        assert_eq!(metadata.provider, "stub-b");
    }

    #[tokio::test]
    async fn oversize_context_is_trimmed_not_rejected() {
        let client = client_with_stub(0);
        let big_context: String = std::iter::repeat("token ").take(2000).collect();
        let request = GenerateRequest {
            prompt: "describe this".to_string(),
            context: Some(big_context),
            task_type: "summarize".to_string(),
            target_language: "en".to_string(),
            model_override: None,
        };

        let result = client.generate(request, 3000).await;
        assert!(result.is_ok());
    }
}
