//! Mermaid regeneration (§4.6 step 3): when a chart fails validation, ask the
//! LLM to fix it, bounded by `MermaidConfig::max_regeneration_attempts`. A
//! chart still invalid after the cap is kept as-is and recorded as a warning.

use std::sync::Arc;

use crate::config::MermaidConfig;
use crate::error::LlmError;
use crate::llm::{GenerateRequest, LlmClient};
use crate::mermaid::validate::{validate_chart, MermaidRenderer};
use crate::types::{Severity, ValidationFinding};

pub struct RegenerationResult {
    pub chart_text: String,
    pub finding: Option<ValidationFinding>,
}

/// Validates `chart_text`; if invalid, asks the model to repair it up to
/// `config.max_regeneration_attempts` times, keeping the last attempt's text
/// regardless of outcome and recording a finding only if it never passes.
pub async fn validate_and_repair(
    document_path: &str,
    chart_index: usize,
    chart_text: &str,
    llm: &Arc<LlmClient>,
    renderer: &dyn MermaidRenderer,
    config: &MermaidConfig,
    target_language: &str,
    model_override: Option<String>,
    now_unix: i64,
) -> Result<RegenerationResult, LlmError> {
    let mut current = chart_text.to_string();
    let mut last_error = match validate_chart(&current, renderer).await {
        Ok(()) => {
            return Ok(RegenerationResult {
                chart_text: current,
                finding: None,
            });
        }
        Err(e) => e,
    };

    for _attempt in 0..config.max_regeneration_attempts {
        let prompt = format!(
            "The following Mermaid diagram fails validation with error: {last_error}\n\n\
             Diagram:\n```mermaid\n{current}\n```\n\n\
             Return only a corrected Mermaid diagram body (no fences, no prose) that fixes this error \
             while preserving the original intent.",
        );
        let request = GenerateRequest {
            prompt,
            context: None,
            task_type: "repair_mermaid".to_string(),
            target_language: target_language.to_string(),
            model_override: model_override.clone(),
        };
        let (candidate, _, _) = llm.generate(request, now_unix).await?;
        let candidate = strip_fences(&candidate);

        match validate_chart(&candidate, renderer).await {
            Ok(()) => {
                return Ok(RegenerationResult {
                    chart_text: candidate,
                    finding: None,
                });
            }
            Err(e) => {
                current = candidate;
                last_error = e;
            }
        }
    }

    Ok(RegenerationResult {
        finding: Some(ValidationFinding {
            document_path: document_path.to_string(),
            chart_index,
            chart_text: current.clone(),
            error_message: last_error,
            severity: Severity::Warning,
        }),
        chart_text: current,
    })
}

fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_open = trimmed.strip_prefix("```mermaid").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim().to_string()
}
