//! `ContentQualityCheck` (§4.5): scores generated text on seven dimensions,
//! each in `[1, 10]`, and decides whether to accept, regenerate, or give up.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{QualityConfig, QUALITY_DIMENSIONS};
use crate::llm::{GenerateRequest, LlmClient};

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub dimensions: HashMap<String, f64>,
    /// Weighted mean of `dimensions`, normalized to `[0, 1]` to match the
    /// `quality_scores.<section>` blackboard contract.
    pub overall: f64,
}

/// Scores `text` against the seven dimensions. `required_diagrams` drives
/// the visualization dimension; `known_terms` (e.g. module names) ground the
/// accuracy dimension in what the repo actually contains.
pub fn score_content(text: &str, required_diagrams: usize, known_terms: &[String], weights: &HashMap<String, f64>) -> QualityReport {
    let word_count = text.split_whitespace().count();
    let mermaid_blocks = text.matches("```mermaid").count();
    let heading_count = text.lines().filter(|l| l.trim_start().starts_with('#')).count();
    let list_count = text.lines().filter(|l| { let t = l.trim_start(); t.starts_with("- ") || t.starts_with("* ") }).count();

    let mentioned_terms = if known_terms.is_empty() {
        known_terms.len()
    } else {
        known_terms.iter().filter(|term| text.contains(term.as_str())).count()
    };

    let sentences: Vec<&str> = text.split(['.', '\n']).filter(|s| !s.trim().is_empty()).collect();
    let avg_sentence_words = if sentences.is_empty() {
        0.0
    } else {
        sentences.iter().map(|s| s.split_whitespace().count()).sum::<usize>() as f64 / sentences.len() as f64
    };

    let explanatory_hits = ["because", "in order to", "for example", "this means", "note that"]
        .iter()
        .filter(|term| text.to_lowercase().contains(*term))
        .count();
    let actionable_hits = ["run ", "install", "usage", "example:", "```"]
        .iter()
        .filter(|term| text.to_lowercase().contains(*term))
        .count();

    let mut dimensions = HashMap::new();
    dimensions.insert("completeness".to_string(), scale(word_count as f64 / 400.0));
    dimensions.insert(
        "accuracy".to_string(),
        if known_terms.is_empty() {
            10.0
        } else {
            scale(mentioned_terms as f64 / known_terms.len() as f64)
        },
    );
    dimensions.insert("readability".to_string(), scale_inverse_penalty(avg_sentence_words, 24.0));
    dimensions.insert("formatting".to_string(), scale((heading_count + list_count) as f64 / 6.0));
    dimensions.insert(
        "visualization".to_string(),
        if required_diagrams == 0 {
            10.0
        } else {
            scale(mermaid_blocks as f64 / required_diagrams as f64)
        },
    );
    dimensions.insert("educational_value".to_string(), scale(explanatory_hits as f64 / 3.0));
    dimensions.insert("practicality".to_string(), scale(actionable_hits as f64 / 3.0));

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for dimension in QUALITY_DIMENSIONS {
        let weight = weights.get(dimension).copied().unwrap_or(1.0 / QUALITY_DIMENSIONS.len() as f64);
        weighted_sum += dimensions.get(dimension).copied().unwrap_or(0.0) * weight;
        weight_total += weight;
    }
    let overall = if weight_total > 0.0 {
        (weighted_sum / weight_total) / 10.0
    } else {
        0.0
    };

    QualityReport { dimensions, overall }
}

fn scale(ratio: f64) -> f64 {
    (ratio.min(1.0).max(0.0) * 9.0) + 1.0
}

/// Penalizes sentences averaging over `ceiling` words; shorter is better.
fn scale_inverse_penalty(value: f64, ceiling: f64) -> f64 {
    if value <= 0.0 {
        return 5.0;
    }
    scale(1.0 - (value / ceiling).min(1.0))
}

fn weakest_dimensions(report: &QualityReport, n: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &f64)> = report.dimensions.iter().collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().take(n).map(|(name, _)| name.clone()).collect()
}

/// Generates content for `base_prompt`, then regenerates while the score is
/// below threshold — capped at `max_regeneration_attempts` and only while
/// each attempt strictly improves the score (the quality-gate monotonicity
/// property, §8): a regeneration that doesn't beat the previous score is
/// discarded and the loop stops rather than thrash.
pub async fn generate_with_quality_loop(
    llm: &Arc<LlmClient>,
    base_prompt: &str,
    task_type: &str,
    target_language: &str,
    required_diagrams: usize,
    known_terms: &[String],
    quality: &QualityConfig,
    model_override: Option<String>,
    now_unix: i64,
) -> Result<(String, QualityReport, usize), crate::error::LlmError> {
    let mut prompt = base_prompt.to_string();
    let request = GenerateRequest {
        prompt: prompt.clone(),
        context: None,
        task_type: task_type.to_string(),
        target_language: target_language.to_string(),
        model_override: model_override.clone(),
    };
    let (mut text, _, _) = llm.generate(request, now_unix).await?;
    let mut report = score_content(&text, required_diagrams, known_terms, &quality.dimension_weights);
    let mut attempts = 0;

    while quality.auto_regenerate && report.overall < quality.acceptance_threshold && attempts < quality.max_regeneration_attempts {
        let weak = weakest_dimensions(&report, 3);
        prompt = format!(
            "{base_prompt}\n\nThe previous attempt scored {:.2} (threshold {:.2}). Its weakest dimensions were: {}. Revise to address them directly.",
            report.overall,
            quality.acceptance_threshold,
            weak.join(", ")
        );
        let retry_request = GenerateRequest {
            prompt: prompt.clone(),
            context: None,
            task_type: task_type.to_string(),
            target_language: target_language.to_string(),
            model_override: model_override.clone(),
        };
        let (candidate_text, _, _) = llm.generate(retry_request, now_unix).await?;
        let candidate_report = score_content(&candidate_text, required_diagrams, known_terms, &quality.dimension_weights);
        attempts += 1;

        if candidate_report.overall > report.overall {
            text = candidate_text;
            report = candidate_report;
        } else {
            break;
        }
    }

    Ok((text, report, attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_rewards_structure_and_diagrams() {
        let weights = crate::config::QualityConfig::default().dimension_weights;
        let rich = "# Title\n\n```mermaid\ngraph TD\nA-->B\n```\n\n- point one\n- point two\n\nFor example, this shows the flow.";
        let plain = "just some words without structure";
        let rich_score = score_content(rich, 1, &[], &weights);
        let plain_score = score_content(plain, 1, &[], &weights);
        assert!(rich_score.overall > plain_score.overall);
    }

    #[test]
    fn overall_score_stays_in_unit_range() {
        let weights = crate::config::QualityConfig::default().dimension_weights;
        let report = score_content("short", 4, &["moduleA".to_string()], &weights);
        assert!(report.overall >= 0.0 && report.overall <= 1.0);
    }
}
