//! Combine stage (§4.7): normalizes heading levels, cross-links module names
//! into relative links, and lays out the output file tree.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};
use std::collections::BTreeMap;

pub const SECTION_FILES: [(&str, &str); 6] = [
    ("overall_architecture", "overall_architecture.md"),
    ("api_docs", "overview.md"),
    ("dependency", "dependency.md"),
    ("timeline", "timeline.md"),
    ("glossary", "glossary.md"),
    ("quick_look", "quick_look.md"),
];

/// Lower-cases, replaces runs of non-alphanumerics with `-`, and trims the
/// result, matching §4.7's slug rule exactly.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            slug.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Shifts every heading in `text` so the shallowest one becomes `target_top`
/// (1-indexed), preserving relative nesting between headings.
pub fn normalize_headings(text: &str, target_top: u8) -> String {
    let parser = Parser::new_ext(text, Options::empty());
    let mut heading_lines: BTreeMap<usize, (HeadingLevel, usize)> = BTreeMap::new();

    for (event, range) in parser.into_offset_iter() {
        if let Event::Start(Tag::Heading { level, .. }) = event {
            let line_start = text[..range.start].rfind('\n').map(|i| i + 1).unwrap_or(0);
            let hashes_end = text[line_start..].find(|c: char| c != '#').map(|i| line_start + i).unwrap_or(line_start);
            heading_lines.insert(line_start, (level, hashes_end));
        }
    }

    if heading_lines.is_empty() {
        return text.to_string();
    }

    let min_level = heading_lines.values().map(|(level, _)| *level as u8).min().unwrap_or(1);
    let shift = target_top as i32 - min_level as i32;

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for (line_start, (level, hashes_end)) in &heading_lines {
        output.push_str(&text[cursor..*line_start]);
        let new_level = ((*level as i32 + shift).clamp(1, 6)) as usize;
        output.push_str(&"#".repeat(new_level));
        cursor = *hashes_end;
    }
    output.push_str(&text[cursor..]);
    output
}

/// Replaces bare occurrences of `module_name` in prose with a relative link
/// to its detail page, skipping text already inside a link or code span.
pub fn cross_link_modules(text: &str, module_names: &[String]) -> String {
    let mut sorted: Vec<&String> = module_names.iter().collect();
    sorted.sort_by_key(|n| std::cmp::Reverse(n.len()));

    let mut result = text.to_string();
    for name in sorted {
        if name.is_empty() {
            continue;
        }
        let link = format!("[{name}](modules/{}.md)", slugify(name));
        result = replace_outside_code_and_links(&result, name, &link);
    }
    result
}

fn replace_outside_code_and_links(text: &str, needle: &str, replacement: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut in_code_fence = false;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code_fence = !in_code_fence;
            output.push_str(line);
            continue;
        }
        if in_code_fence || line.contains('`') || line.contains("](") {
            output.push_str(line);
            continue;
        }
        output.push_str(&replace_first_occurrence(line, needle, replacement));
    }
    output
}

fn replace_first_occurrence(line: &str, needle: &str, replacement: &str) -> String {
    match line.find(needle) {
        Some(pos) => format!("{}{}{}", &line[..pos], replacement, &line[pos + needle.len()..]),
        None => line.to_string(),
    }
}

/// One file that the assembled tree will contain, in the declared nav order.
pub struct TreeFile {
    pub relative_path: String,
    pub content: String,
}

/// Builds the `output_dir/<repo>/` tree (§4.7): `index.md`, the six section
/// files, `modules/index.md`, and one `modules/<slug>.md` per module.
pub fn build_file_tree(
    section_contents: &BTreeMap<&str, String>,
    module_contents: &[(String, String)],
    module_names: &[String],
) -> Vec<TreeFile> {
    let mut files = Vec::new();

    let mut nav = String::from("# Documentation\n\n");
    for (section, filename) in SECTION_FILES {
        nav.push_str(&format!("- [{}]({filename})\n", display_title(section)));
    }
    nav.push_str("- [Modules](modules/index.md)\n");
    files.push(TreeFile {
        relative_path: "index.md".to_string(),
        content: nav,
    });

    for (section, filename) in SECTION_FILES {
        if let Some(content) = section_contents.get(section) {
            let linked = cross_link_modules(content, module_names);
            let normalized = normalize_headings(&linked, 1);
            files.push(TreeFile {
                relative_path: filename.to_string(),
                content: normalized,
            });
        }
    }

    let mut module_index = String::from("# Modules\n\n");
    for (name, _) in module_contents {
        module_index.push_str(&format!("- [{name}]({}.md)\n", slugify(name)));
    }
    files.push(TreeFile {
        relative_path: "modules/index.md".to_string(),
        content: module_index,
    });

    for (name, content) in module_contents {
        let linked = cross_link_modules(content, module_names);
        let normalized = normalize_headings(&linked, 1);
        files.push(TreeFile {
            relative_path: format!("modules/{}.md", slugify(name)),
            content: normalized,
        });
    }

    files
}

fn display_title(section: &str) -> String {
    section
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_and_trims_non_alphanumerics() {
        assert_eq!(slugify("  Auth--Service!! "), "auth-service");
        assert_eq!(slugify("core_modules"), "core-modules");
    }

    #[test]
    fn normalize_headings_shifts_so_shallowest_becomes_target() {
        let text = "### Title\n\nBody\n\n#### Sub\n";
        let normalized = normalize_headings(text, 1);
        assert!(normalized.starts_with("# Title"));
        assert!(normalized.contains("## Sub"));
    }

    #[test]
    fn cross_link_skips_code_fences_and_existing_links() {
        let text = "The auth module handles login.\n\n```\nauth::login()\n```\n\nSee [auth](x.md) too.\n";
        let linked = cross_link_modules(text, &["auth".to_string()]);
        assert!(linked.contains("[auth](modules/auth.md) module handles login"));
        assert!(linked.contains("auth::login()"));
        assert!(linked.contains("[auth](x.md)"));
    }

    #[test]
    fn build_file_tree_includes_index_sections_and_modules() {
        let mut sections = BTreeMap::new();
        sections.insert("glossary", "# Glossary\nTerms.".to_string());
        let modules = vec![("Auth Service".to_string(), "# Auth Service\nDetails.".to_string())];
        let files = build_file_tree(&sections, &modules, &["Auth Service".to_string()]);
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert!(paths.contains(&"index.md"));
        assert!(paths.contains(&"glossary.md"));
        assert!(paths.contains(&"modules/index.md"));
        assert!(paths.contains(&"modules/auth-service.md"));
    }
}
