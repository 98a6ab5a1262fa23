//! Mermaid chart validation (§4.6 step 2): an external renderer is tried
//! first when one is configured; otherwise rule-based checks cover chart
//! type, identifier syntax, label balance, and arrow syntax.

use async_trait::async_trait;
use regex::Regex;

pub const SUPPORTED_CHART_TYPES: [&str; 9] = [
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "pie",
    "timeline",
    "gitgraph",
    "mindmap",
];
const ER_DIAGRAM: &str = "erDiagram";

/// An external Mermaid renderer, e.g. a headless `mmdc` invocation. No
/// concrete binary integration is in scope here, so the only implementation
/// shipped is `None` — rule-based validation always runs as the fallback.
#[async_trait]
pub trait MermaidRenderer: Send + Sync {
    async fn render(&self, chart_text: &str) -> Result<(), String>;
}

pub struct NoRenderer;

#[async_trait]
impl MermaidRenderer for NoRenderer {
    async fn render(&self, _chart_text: &str) -> Result<(), String> {
        Err("no external renderer configured".to_string())
    }
}

pub async fn validate_chart(chart_text: &str, renderer: &dyn MermaidRenderer) -> Result<(), String> {
    if renderer.render(chart_text).await.is_ok() {
        return Ok(());
    }
    validate_by_rules(chart_text)
}

fn validate_by_rules(chart_text: &str) -> Result<(), String> {
    let declared_type = declared_chart_type(chart_text).ok_or_else(|| "no supported chart type declared on first non-empty line".to_string())?;

    check_identifiers(chart_text)?;
    check_label_balance(chart_text)?;
    check_arrow_syntax(chart_text, &declared_type)?;
    Ok(())
}

fn declared_chart_type(chart_text: &str) -> Option<String> {
    let first_line = chart_text.lines().find(|l| !l.trim().is_empty())?.trim();
    let first_word = first_line.split_whitespace().next()?;
    if SUPPORTED_CHART_TYPES.iter().any(|t| *t == first_word) || first_word == ER_DIAGRAM {
        Some(first_word.to_string())
    } else {
        None
    }
}

fn check_identifiers(chart_text: &str) -> Result<(), String> {
    let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid");
    let token = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").expect("static regex is valid");

    for line in chart_text.lines().skip(1) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("%%") {
            continue;
        }
        if let Some(before_label) = trimmed.split(['[', '(', '{']).next() {
            for candidate in before_label.split("-->").flat_map(|s| s.split("---")) {
                let candidate = candidate.trim();
                if candidate.is_empty() || candidate.contains(':') {
                    continue;
                }
                if let Some(captured) = token.find(candidate) {
                    if captured.start() == 0 && !identifier.is_match(&candidate[..captured.end()]) {
                        return Err(format!("identifier '{candidate}' does not match [A-Za-z_][A-Za-z0-9_]*"));
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_label_balance(chart_text: &str) -> Result<(), String> {
    for line in chart_text.lines() {
        for (open, close) in [('[', ']'), ('(', ')'), ('{', '}')] {
            let opens = line.matches(open).count();
            let closes = line.matches(close).count();
            if opens != closes {
                return Err(format!("unbalanced '{open}'/'{close}' on line: {line}"));
            }
        }
        let label_contents = extract_label_contents(line);
        for label in label_contents {
            if label.matches('(').count() != label.matches(')').count() {
                return Err(format!("unescaped parenthesis inside label: {label}"));
            }
            if label.matches('"').count() % 2 != 0 {
                return Err(format!("unbalanced quote inside label: {label}"));
            }
        }
    }
    Ok(())
}

fn extract_label_contents(line: &str) -> Vec<String> {
    let mut labels = Vec::new();
    for (open, close) in [('[', ']'), ('{', '}')] {
        let mut rest = line;
        while let Some(start) = rest.find(open) {
            if let Some(end) = rest[start..].find(close) {
                labels.push(rest[start + 1..start + end].to_string());
                rest = &rest[start + end + 1..];
            } else {
                break;
            }
        }
    }
    labels
}

fn check_arrow_syntax(chart_text: &str, chart_type: &str) -> Result<(), String> {
    let allowed: &[&str] = match chart_type {
        "sequenceDiagram" => &["->>", "-->>", "->", "-->"],
        "classDiagram" => &["-->", "--|>", "--*", "--o", "..>"],
        "stateDiagram" => &["-->"],
        "graph" | "flowchart" => &["-->", "---", "-.->", "==>"],
        _ => &[],
    };
    if allowed.is_empty() {
        return Ok(());
    }
    for line in chart_text.lines().skip(1) {
        if !line.contains("--") && !line.contains("->") && !line.contains("..") {
            continue;
        }
        if !allowed.iter().any(|arrow| line.contains(arrow)) {
            return Err(format!("arrow syntax not recognized for chart type '{chart_type}': {line}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_a_well_formed_graph() {
        let chart = "graph TD\nA[Start] --> B[Finish]\n";
        assert!(validate_chart(chart, &NoRenderer).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_chart_type_declaration() {
        let chart = "A --> B\n";
        assert!(validate_chart(chart, &NoRenderer).await.is_err());
    }

    #[tokio::test]
    async fn rejects_unescaped_parenthesis_in_label() {
        let chart = "graph TD\nA[foo(bar)] --> B\n";
        assert!(validate_chart(chart, &NoRenderer).await.is_err());
    }

    #[tokio::test]
    async fn rejects_disallowed_arrow_for_sequence_diagram() {
        let chart = "sequenceDiagram\nAlice -..- Bob\n";
        assert!(validate_chart(chart, &NoRenderer).await.is_err());
    }
}
