//! Model string parsing and the provider dispatch trait (§4.3 steps 4/5).
//!
//! Every `provider/model` (or `provider/upstream/model` for aggregator
//! providers) string is parsed by a small hand-written splitter — no regex
//! needed for a fixed-arity delimited format. Unknown provider prefixes
//! resolve to [`ModelRef::Generic`]'s HTTP provider using the configured
//! `base_url`: this system routes every vendor through an OpenAI-compatible
//! gateway in practice, so one provider implementation covers them all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LlmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub upstream: Option<String>,
    pub model: String,
}

impl ModelRef {
    /// Parses `provider/model` or `provider/upstream/model`.
    pub fn parse(spec: &str) -> Result<Self, LlmError> {
        let parts: Vec<&str> = spec.split('/').collect();
        match parts.as_slice() {
            [provider, model] if !provider.is_empty() && !model.is_empty() => Ok(ModelRef {
                provider: provider.to_string(),
                upstream: None,
                model: model.to_string(),
            }),
            [provider, upstream, model] if !provider.is_empty() && !upstream.is_empty() && !model.is_empty() => {
                Ok(ModelRef {
                    provider: provider.to_string(),
                    upstream: Some(upstream.to_string()),
                    model: model.to_string(),
                })
            }
            _ => Err(LlmError::BadModelString(spec.to_string())),
        }
    }

    /// The model identifier to send to the wire provider: the upstream
    /// segment, when present, is how an aggregator names the underlying
    /// model (e.g. `openrouter/anthropic/claude-3.5-sonnet`).
    pub fn wire_model(&self) -> String {
        match &self.upstream {
            Some(upstream) => format!("{upstream}/{}", self.model),
            None => self.model.clone(),
        }
    }

    /// The full `provider[/upstream]/model` string this was parsed from,
    /// used to compare a resolved model against a configured fallback list.
    pub fn spec(&self) -> String {
        match &self.upstream {
            Some(upstream) => format!("{}/{upstream}/{}", self.provider, self.model),
            None => format!("{}/{}", self.provider, self.model),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub output_tokens: usize,
}

/// The single seam to a real network vendor. Implementations are
/// substituted with a stub in tests so nothing in this crate's test suite
/// touches the network.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequestBody<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct ChatCompletionResponseBody {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    completion_tokens: usize,
}

/// Minimal OpenAI-compatible chat-completions client, used for every
/// provider prefix this layer doesn't special-case — which today is all of
/// them (§4.3: "every ambient provider/model string in this domain routes
/// through an OpenAI-compatible gateway in practice").
pub struct GenericHttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GenericHttpProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for GenericHttpProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_prompt,
        });

        let body = ChatCompletionRequestBody {
            model: request.model.wire_model(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!(body_as_value(&body)))
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: request.model.provider.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LlmError::Request {
                provider: request.model.provider.clone(),
                message: format!("transient HTTP status {status}"),
            });
        }
        if !status.is_success() {
            return Err(LlmError::Request {
                provider: request.model.provider.clone(),
                message: format!("HTTP status {status}"),
            });
        }

        let parsed: ChatCompletionResponseBody = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: request.model.provider.clone(),
            reason: e.to_string(),
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: request.model.provider.clone(),
                reason: "no choices in response".to_string(),
            })?;

        let output_tokens = parsed.usage.map(|usage| usage.completion_tokens).unwrap_or(0);

        Ok(CompletionResponse { text, output_tokens })
    }
}

fn body_as_value(body: &ChatCompletionRequestBody<'_>) -> serde_json::Value {
    serde_json::to_value(body).expect("ChatCompletionRequestBody always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_segment_model_string() {
        let model = ModelRef::parse("openai/gpt-4o-mini").unwrap();
        assert_eq!(model.provider, "openai");
        assert_eq!(model.upstream, None);
        assert_eq!(model.model, "gpt-4o-mini");
        assert_eq!(model.wire_model(), "gpt-4o-mini");
        assert_eq!(model.spec(), "openai/gpt-4o-mini");
    }

    #[test]
    fn parses_three_segment_aggregator_model_string() {
        let model = ModelRef::parse("openrouter/anthropic/claude-3.5-sonnet").unwrap();
        assert_eq!(model.provider, "openrouter");
        assert_eq!(model.upstream.as_deref(), Some("anthropic"));
        assert_eq!(model.wire_model(), "anthropic/claude-3.5-sonnet");
        assert_eq!(model.spec(), "openrouter/anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn rejects_malformed_model_strings() {
        assert!(ModelRef::parse("just-a-model").is_err());
        assert!(ModelRef::parse("too/many/nested/segments/here").is_err());
        assert!(ModelRef::parse("/missing-provider").is_err());
    }
}
