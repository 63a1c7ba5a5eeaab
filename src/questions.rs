//! Question and reference-answer file formats.
//!
//! Questions: one per non-blank line, with an optional case-insensitive `Q:`
//! prefix. A line holding only the prefix stays as an empty question so row
//! numbers keep lining up with the reference file. References: free text where every answer starts with `A: `; the
//! N-th answer belongs to the N-th question.

use std::path::Path;

use anyhow::{Context, Result};

/// Parse a question list.
pub fn parse_questions(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| strip_prefix_ci(line, "q:").trim().to_string())
        .collect()
}

pub fn read_questions(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {}", path.display()))?;
    Ok(parse_questions(&content))
}

/// Split reference text into answers on `A: ` markers.
///
/// Text before the first marker is kept as an answer only if non-blank,
/// matching files that omit the marker on the first answer.
pub fn parse_references(content: &str) -> Vec<String> {
    content
        .split("A: ")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_references(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read references file: {}", path.display()))?;
    Ok(parse_references(&content))
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> &'a str {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &s[prefix.len()..],
        _ => s,
    }
}
