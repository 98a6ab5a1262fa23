//! Format stage (§4.7): emoji-annotates headings, injects a table of
//! contents, appends a prev/next navigation footer, and writes each file
//! atomically (temp write + rename).

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::assemble::combine::TreeFile;

fn emoji_for(relative_path: &str) -> &'static str {
    match relative_path {
        "index.md" => "\u{1F4D6}",
        "overall_architecture.md" => "\u{1F3D7}\u{FE0F}",
        "overview.md" => "\u{1F4D8}",
        "dependency.md" => "\u{1F578}\u{FE0F}",
        "glossary.md" => "\u{1F4DA}",
        "timeline.md" => "\u{1F4C5}",
        "quick_look.md" => "\u{1F440}",
        "modules/index.md" => "\u{1F9E9}",
        _ => "\u{1F4C4}",
    }
}

/// Prefixes the document's first top-level heading with an emoji drawn from
/// a filename→emoji map; leaves the document untouched if it has no heading.
pub fn apply_emoji(content: &str, relative_path: &str) -> String {
    let emoji = emoji_for(relative_path);
    let mut lines = content.lines();
    match lines.next() {
        Some(first) if first.trim_start().starts_with('#') && !first.contains(emoji) => {
            let rest: String = lines.collect::<Vec<_>>().join("\n");
            let trailer = if content.ends_with('\n') { "\n" } else { "" };
            format!("{first} {emoji}\n{rest}{trailer}")
        }
        _ => content.to_string(),
    }
}

/// Builds a table of contents from `##`-and-deeper headings and inserts it
/// right after the document's first heading line.
pub fn inject_toc(content: &str) -> String {
    let mut lines: Vec<&str> = content.lines().collect();
    let Some(first_heading_idx) = lines.iter().position(|l| l.trim_start().starts_with('#')) else {
        return content.to_string();
    };

    let mut toc = vec![String::new(), "## Table of Contents".to_string(), String::new()];
    for line in &lines {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (2..=3).contains(&level) {
            let title = trimmed.trim_start_matches('#').trim();
            let anchor = anchor_for(title);
            let indent = "  ".repeat(level - 2);
            toc.push(format!("{indent}- [{title}](#{anchor})"));
        }
    }
    if toc.len() <= 3 {
        return content.to_string();
    }
    toc.push(String::new());

    let insert_at = first_heading_idx + 1;
    let mut result: Vec<String> = lines.drain(..insert_at).map(String::from).collect();
    result.extend(toc);
    result.extend(lines.into_iter().map(String::from));
    result.join("\n") + if content.ends_with('\n') { "\n" } else { "" }
}

fn anchor_for(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c.is_whitespace() || c == '-' {
                Some('-')
            } else {
                None
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Appends a prev/next footer derived from the tree's declared nav order.
pub fn append_nav_footer(content: &str, relative_path: &str, order: &[String]) -> String {
    let Some(pos) = order.iter().position(|p| p == relative_path) else {
        return content.to_string();
    };

    let prev = pos.checked_sub(1).and_then(|i| order.get(i));
    let next = order.get(pos + 1);
    if prev.is_none() && next.is_none() {
        return content.to_string();
    }

    let mut footer = String::from("\n---\n\n");
    if let Some(p) = prev {
        footer.push_str(&format!("[< Previous]({}) ", relative_link(relative_path, p)));
    }
    if let Some(n) = next {
        footer.push_str(&format!("[Next >]({})", relative_link(relative_path, n)));
    }
    footer.push('\n');
    format!("{content}{footer}")
}

/// Builds a relative link from `from`'s directory to `to`, both given as
/// slash-separated paths rooted at the output tree.
fn relative_link(from: &str, to: &str) -> String {
    let from_dirs: Vec<&str> = from.rsplit_once('/').map(|(dir, _)| dir.split('/').collect()).unwrap_or_default();
    let (to_dirs, to_file): (Vec<&str>, &str) = match to.rsplit_once('/') {
        Some((dir, file)) => (dir.split('/').collect(), file),
        None => (Vec::new(), to),
    };

    let common = from_dirs.iter().zip(to_dirs.iter()).take_while(|(a, b)| a == b).count();
    let ups = "../".repeat(from_dirs.len() - common);
    let downs: String = to_dirs[common..].iter().map(|d| format!("{d}/")).collect();
    format!("{ups}{downs}{to_file}")
}

/// Runs the full Format stage over every file in `files`, writing the result
/// under `root` with atomic temp-write-then-rename per file.
pub fn format_and_write(root: &Path, files: &[TreeFile]) -> std::io::Result<Vec<String>> {
    let order: Vec<String> = files.iter().map(|f| f.relative_path.clone()).collect();
    let mut written = Vec::new();

    for file in files {
        let mut content = apply_emoji(&file.content, &file.relative_path);
        content = inject_toc(&content);
        content = append_nav_footer(&content, &file.relative_path, &order);

        let target = root.join(&file.relative_path);
        write_atomically(&target, &content)?;
        written.push(target.to_string_lossy().to_string());
    }

    Ok(written)
}

fn write_atomically(target: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut temp_path = target.to_path_buf();
    let file_name = format!(".{}.tmp", target.file_name().and_then(|n| n.to_str()).unwrap_or("out"));
    temp_path.set_file_name(file_name);

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_emoji_prefixes_known_file_heading() {
        let result = apply_emoji("# Dependency\n\nBody", "dependency.md");
        assert!(result.starts_with("# Dependency \u{1F578}\u{FE0F}"));
    }

    #[test]
    fn inject_toc_lists_second_and_third_level_headings() {
        let content = "# Title\n\n## Section One\n\nBody\n\n### Sub\n";
        let result = inject_toc(content);
        assert!(result.contains("Table of Contents"));
        assert!(result.contains("[Section One](#section-one)"));
        assert!(result.contains("  - [Sub](#sub)"));
    }

    #[test]
    fn nav_footer_links_previous_and_next_with_relative_depth() {
        let order = vec!["index.md".to_string(), "modules/auth.md".to_string(), "modules/storage.md".to_string()];
        let footer = append_nav_footer("content", "modules/auth.md", &order);
        assert!(footer.contains("[< Previous](../index.md)"));
        assert!(footer.contains("[Next >](storage.md)"));
    }

    #[test]
    fn write_atomically_produces_the_final_file_without_leftover_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index.md");
        write_atomically(&target, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.')).collect();
        assert!(leftovers.is_empty());
    }
}
