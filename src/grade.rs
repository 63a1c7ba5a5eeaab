//! Rubric grading of produced answers against reference answers.
//!
//! Each (question, answer, reference) triple is sent to a generation model
//! with a fixed rubric. The model must reply with a JSON object
//! `{"score": 0 | 0.5 | 1, "explanation": "..."}`, optionally wrapped in a
//! single Markdown code fence. Anything else is a [`GradeError::Malformed`]
//! and the row is recorded as ungraded rather than given a made-up score.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vignette_rag_core::pipeline::GenerationProvider;
use vignette_rag_core::prompt::Prompt;
use vignette_rag_core::ServiceError;

use crate::output::{AnswerRow, GradedRow};
use crate::progress::{ProgressEvent, ProgressReporter};

const GRADER_SYSTEM: &str =
    "You are an expert grader. Always return ONLY valid JSON, with no markdown and no extra text.";

const RUBRIC: &str = "You are grading answers to vignette case questions.

Compare the student's answer against the reference answer.

Score each answer discretely as:
- 1 (correct): the student's answer contains the key factual information from the reference answer, even if worded differently
- 0.5 (partially correct): the student's answer contains some correct information but is incomplete or contains some inaccuracies
- 0 (wrong): the student's answer contradicts the reference answer or is completely incorrect

Focus on factual accuracy and completeness, not style or exact wording.
Be strict but fair.";

pub const EMPTY_ROW_EXPLANATION: &str = "WRONG. Empty question or answer.";
pub const NO_REFERENCE_EXPLANATION: &str = "WRONG. No reference answer available.";

#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("grader reply is not a valid verdict: {0}")]
    Malformed(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Correct,
    Partial,
    Wrong,
}

impl Score {
    pub fn value(self) -> f32 {
        match self {
            Score::Correct => 1.0,
            Score::Partial => 0.5,
            Score::Wrong => 0.0,
        }
    }

    fn from_value(v: f64) -> Option<Self> {
        if v == 1.0 {
            Some(Score::Correct)
        } else if v == 0.5 {
            Some(Score::Partial)
        } else if v == 0.0 {
            Some(Score::Wrong)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: Score,
    pub explanation: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    score: f64,
    explanation: String,
}

/// Parse a grader reply. See the module docs for the accepted shape.
pub fn parse_verdict(reply: &str) -> Result<Verdict, GradeError> {
    let body = strip_code_fence(reply.trim());
    let raw: RawVerdict =
        serde_json::from_str(body).map_err(|e| GradeError::Malformed(e.to_string()))?;
    let score = Score::from_value(raw.score).ok_or_else(|| {
        GradeError::Malformed(format!("score must be 0, 0.5 or 1, got {}", raw.score))
    })?;
    let explanation = raw.explanation.trim().to_string();
    if explanation.is_empty() {
        return Err(GradeError::Malformed("empty explanation".to_string()));
    }
    Ok(Verdict { score, explanation })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return s;
    };
    // Drop an info string such as `json` on the opening fence line.
    match inner.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with('{') => body.trim(),
        _ => inner.trim(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    Graded(Verdict),
    Ungraded { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GradeSummary {
    pub total: usize,
    pub graded: usize,
    pub total_score: f32,
    /// Mean score over graded rows.
    pub average: f32,
    pub correct: usize,
    pub partial: usize,
    pub wrong: usize,
    pub ungraded: usize,
}

impl GradeSummary {
    pub fn from_outcomes(outcomes: &[GradeOutcome]) -> Self {
        let mut s = GradeSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                GradeOutcome::Graded(v) => {
                    s.graded += 1;
                    s.total_score += v.score.value();
                    match v.score {
                        Score::Correct => s.correct += 1,
                        Score::Partial => s.partial += 1,
                        Score::Wrong => s.wrong += 1,
                    }
                }
                GradeOutcome::Ungraded { .. } => s.ungraded += 1,
            }
        }
        if s.graded > 0 {
            s.average = s.total_score / s.graded as f32;
        }
        s
    }
}

pub struct Grader {
    generator: Arc<dyn GenerationProvider>,
    delay: Duration,
}

impl Grader {
    pub fn new(generator: Arc<dyn GenerationProvider>, delay: Duration) -> Self {
        Self { generator, delay }
    }

    fn prompt(question: &str, answer: &str, reference: &str) -> Prompt {
        let user = format!(
            "Rubric:\n{RUBRIC}\n\nQuestion:\n{question}\n\n\
             Reference answer (correct answer from guidelines):\n{reference}\n\n\
             Student answer:\n{answer}\n\n\
             Compare the student's answer to the reference answer and determine if it is factually correct.\n\n\
             Return a JSON object with exactly these fields:\n\
             - \"score\": a number from 0, 0.5, or 1\n\
             - \"explanation\": a short 1-3 sentence explanation for the score, starting with either CORRECT, PARTIALLY CORRECT, or WRONG\n\n\
             Only output valid JSON, nothing else."
        );
        Prompt {
            system: GRADER_SYSTEM.to_string(),
            user,
            context_block: String::new(),
        }
    }

    /// Ask the model for a verdict on one row.
    pub async fn grade_one(
        &self,
        question: &str,
        answer: &str,
        reference: &str,
    ) -> Result<Verdict, GradeError> {
        let response = self
            .generator
            .generate(&Self::prompt(question, answer, reference))
            .await?;
        let reply = response
            .first_text()
            .ok_or_else(|| GradeError::Malformed("reply has no text".to_string()))?;
        parse_verdict(reply)
    }

    /// Grade every row; the N-th reference belongs to the N-th row.
    pub async fn grade_all(
        &self,
        rows: &[AnswerRow],
        references: &[String],
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Vec<GradeOutcome> {
        if references.len() != rows.len() {
            warn!(
                references = references.len(),
                rows = rows.len(),
                "reference count does not match answer count"
            );
        }

        let mut outcomes = Vec::with_capacity(rows.len());
        let mut called = false;
        for (i, row) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                outcomes.push(GradeOutcome::Ungraded {
                    reason: "cancelled".to_string(),
                });
                continue;
            }

            let question = row.question.trim();
            let answer = row.answer.trim();
            let reference = references.get(i).map(|r| r.trim()).unwrap_or("");
            let outcome = if question.is_empty() || answer.is_empty() {
                GradeOutcome::Graded(Verdict {
                    score: Score::Wrong,
                    explanation: EMPTY_ROW_EXPLANATION.to_string(),
                })
            } else if reference.is_empty() {
                GradeOutcome::Graded(Verdict {
                    score: Score::Wrong,
                    explanation: NO_REFERENCE_EXPLANATION.to_string(),
                })
            } else {
                if called && !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                called = true;
                match self.grade_one(question, answer, reference).await {
                    Ok(v) => GradeOutcome::Graded(v),
                    Err(e) => {
                        warn!(row = i + 1, error = %e, "row left ungraded");
                        GradeOutcome::Ungraded {
                            reason: e.to_string(),
                        }
                    }
                }
            };
            progress.report(ProgressEvent::Graded {
                n: i + 1,
                total: rows.len(),
            });
            outcomes.push(outcome);
        }

        let summary = GradeSummary::from_outcomes(&outcomes);
        info!(
            total = summary.total,
            graded = summary.graded,
            average = summary.average,
            "grading finished"
        );
        outcomes
    }
}

/// Join rows and outcomes into CSV rows.
pub fn graded_rows(rows: &[AnswerRow], outcomes: &[GradeOutcome]) -> Vec<GradedRow> {
    rows.iter()
        .zip(outcomes)
        .map(|(row, outcome)| {
            let (score, explanation) = match outcome {
                GradeOutcome::Graded(v) => (Some(v.score.value()), v.explanation.clone()),
                GradeOutcome::Ungraded { reason } => (None, format!("UNGRADED. {}", reason)),
            };
            GradedRow {
                question: row.question.clone(),
                answer: row.answer.clone(),
                score,
                explanation,
            }
        })
        .collect()
}
