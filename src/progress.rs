//! Batch and grading progress reporting.
//!
//! Long runs (hundreds of questions, each with a generation call) report
//! progress on **stderr** so stdout and the output files stay clean:
//!
//! ```text
//! index   1,532 chunks from 14 documents
//! answer  12 / 120 questions
//! grade   40 / 120 rows
//! ```

use std::io::{IsTerminal, Write};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The corpus index is ready.
    Indexed { documents: usize, chunks: usize },
    /// `n` questions have finished (answered, failed, or cancelled).
    Answered { n: usize, total: usize },
    /// `n` rows have been graded or skipped.
    Graded { n: usize, total: usize },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress lines on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Indexed { documents, chunks } => format!(
                "index   {} chunks from {} documents\n",
                format_number(*chunks),
                format_number(*documents)
            ),
            ProgressEvent::Answered { n, total } => format!(
                "answer  {} / {} questions\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Graded { n, total } => format!(
                "grade   {} / {} rows\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Indexed { documents, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "index",
                "documents": documents,
                "chunks": chunks,
            }),
            ProgressEvent::Answered { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "answer",
                "n": n,
                "total": total,
            }),
            ProgressEvent::Graded { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "grade",
                "n": n,
                "total": total,
            }),
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
