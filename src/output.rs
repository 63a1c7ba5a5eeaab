//! CSV and JSON run artifacts.
//!
//! The answers CSV has exactly two columns, `Q` and `A`, one row per input
//! question in input order. The graded CSV adds `score` and `explanation`;
//! an ungraded row leaves `score` empty.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRow {
    #[serde(rename = "Q")]
    pub question: String,
    #[serde(rename = "A", default)]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedRow {
    #[serde(rename = "Q")]
    pub question: String,
    #[serde(rename = "A")]
    pub answer: String,
    pub score: Option<f32>,
    pub explanation: String,
}

pub fn write_answers<W: std::io::Write>(writer: W, rows: &[AnswerRow]) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    // Header is written even for an empty batch.
    w.write_record(["Q", "A"])?;
    for row in rows {
        w.write_record([row.question.as_str(), row.answer.as_str()])?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_answers_file(path: &Path, rows: &[AnswerRow]) -> Result<()> {
    let file = create(path)?;
    write_answers(file, rows).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_answers<R: std::io::Read>(reader: R) -> Result<Vec<AnswerRow>> {
    let mut r = csv::Reader::from_reader(reader);
    let headers = r.headers()?.clone();
    if !headers.iter().any(|h| h == "Q") || !headers.iter().any(|h| h == "A") {
        bail!("answers CSV must have columns named 'Q' and 'A'");
    }
    let mut rows = Vec::new();
    for (i, record) in r.deserialize().enumerate() {
        let row: AnswerRow = record.with_context(|| format!("Invalid answers CSV row {}", i + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_answers_file(path: &Path) -> Result<Vec<AnswerRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open answers CSV: {}", path.display()))?;
    read_answers(file)
}

pub fn write_graded<W: std::io::Write>(writer: W, rows: &[GradedRow]) -> Result<()> {
    let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    w.write_record(["Q", "A", "score", "explanation"])?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_graded_file(path: &Path, rows: &[GradedRow]) -> Result<()> {
    let file = create(path)?;
    write_graded(file, rows).with_context(|| format!("Failed to write {}", path.display()))
}

/// Pretty-printed JSON written next to the CSV.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = create(path)?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn create(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}
