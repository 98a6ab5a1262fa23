//! Generator prompt templates (§4.5, §9): plain `{placeholder}`-substituted
//! strings owned by data, not compiled into the engine, so a deployment can
//! override one section's wording without a code change.

use std::collections::HashMap;

/// One of the seven content sections (`module_details` excluded — it is a
/// batch of per-module prompts built from [`ModuleDetailTemplate`]).
#[derive(Debug, Clone)]
pub struct GeneratorSpec {
    pub section: &'static str,
    pub required_diagrams: usize,
    pub prompt_template: String,
}

impl GeneratorSpec {
    /// Substitutes `{repo_name}` and `{context}` into the template.
    pub fn render(&self, repo_name: &str, context: &str) -> String {
        self.prompt_template
            .replace("{repo_name}", repo_name)
            .replace("{context}", context)
    }
}

fn default_specs() -> Vec<GeneratorSpec> {
    vec![
        GeneratorSpec {
            section: "overall_architecture",
            required_diagrams: 4,
            prompt_template: "Write the overall architecture section for {repo_name}. Include at least 4 Mermaid diagrams covering module layout, data flow, request lifecycle, and deployment topology.\n\nContext:\n{context}".to_string(),
        },
        GeneratorSpec {
            section: "api_docs",
            required_diagrams: 1,
            prompt_template: "Write API reference documentation for {repo_name}'s public surface. Include at least 1 Mermaid sequence diagram for a representative call.\n\nContext:\n{context}".to_string(),
        },
        GeneratorSpec {
            section: "dependency",
            required_diagrams: 2,
            prompt_template: "Describe {repo_name}'s module dependency structure. Include at least 2 Mermaid graph diagrams: one module-level, one for the most interconnected subsystem.\n\nContext:\n{context}".to_string(),
        },
        GeneratorSpec {
            section: "timeline",
            required_diagrams: 2,
            prompt_template: "Summarize the development history and evolution of {repo_name}. Include at least 2 Mermaid timeline diagrams.\n\nContext:\n{context}".to_string(),
        },
        GeneratorSpec {
            section: "glossary",
            required_diagrams: 1,
            prompt_template: "Produce a glossary of domain and code terms for {repo_name}. Include at least 1 Mermaid diagram relating the core concepts.\n\nContext:\n{context}".to_string(),
        },
        GeneratorSpec {
            section: "quick_look",
            required_diagrams: 1,
            prompt_template: "Write a quick-look summary of {repo_name} for a new contributor's first five minutes. Include at least 1 Mermaid diagram.\n\nContext:\n{context}".to_string(),
        },
    ]
}

/// Holds the six non-batch generator specs, loaded from an embedded default
/// set and overridable by section key (mirrors how node/flow construction
/// elsewhere treats configuration as external data).
pub struct PromptStore {
    specs: HashMap<&'static str, GeneratorSpec>,
}

impl Default for PromptStore {
    fn default() -> Self {
        let specs = default_specs().into_iter().map(|spec| (spec.section, spec)).collect();
        Self { specs }
    }
}

impl PromptStore {
    pub fn all(&self) -> Vec<GeneratorSpec> {
        let mut specs: Vec<GeneratorSpec> = self.specs.values().cloned().collect();
        specs.sort_by_key(|spec| spec.section);
        specs
    }

    pub fn get(&self, section: &str) -> Option<&GeneratorSpec> {
        self.specs.get(section)
    }

    /// Overrides one section's template, keeping its required-diagram count.
    pub fn override_template(&mut self, section: &'static str, template: String) {
        if let Some(spec) = self.specs.get_mut(section) {
            spec.prompt_template = template;
        }
    }
}

pub const MODULE_DETAIL_TEMPLATE: &str =
    "Write a detail page for the module '{module_name}' in {repo_name}. Describe its responsibility, public surface, and how it relates to its immediate dependency neighbors.\n\nModule source:\n{module_source}\n\nNeighboring modules:\n{neighbors}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders() {
        let spec = GeneratorSpec {
            section: "quick_look",
            required_diagrams: 1,
            prompt_template: "About {repo_name}: {context}".to_string(),
        };
        assert_eq!(spec.render("repo-atlas", "a tool"), "About repo-atlas: a tool");
    }

    #[test]
    fn store_covers_all_six_section_generators() {
        let store = PromptStore::default();
        assert_eq!(store.all().len(), 6);
        assert!(store.get("overall_architecture").unwrap().required_diagrams >= 4);
    }

    #[test]
    fn override_replaces_template_but_keeps_diagram_count() {
        let mut store = PromptStore::default();
        store.override_template("quick_look", "Custom: {repo_name}".to_string());
        let spec = store.get("quick_look").unwrap();
        assert_eq!(spec.prompt_template, "Custom: {repo_name}");
        assert_eq!(spec.required_diagrams, 1);
    }
}
