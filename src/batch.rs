//! Batch answering over a question list.
//!
//! Questions run through the pipeline with at most `concurrency` in flight;
//! results come back in input order regardless of completion order. A
//! per-question failure is recorded and the batch moves on. When the
//! cancellation token fires, questions that have not started yet are
//! reported as cancelled while in-flight ones finish normally.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use vignette_rag_core::pipeline::{Answer, AnswerStatus, AnsweringPipeline, BaselineAnswerer};

use crate::output::AnswerRow;
use crate::progress::{ProgressEvent, ProgressReporter};

/// `rag` answers from the corpus; `base` answers from the model alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    Rag,
    Base,
}

/// What answers each question in a batch.
#[derive(Clone)]
pub enum Answerer {
    Rag(AnsweringPipeline),
    Base(BaselineAnswerer),
}

impl Answerer {
    pub fn mode(&self) -> AnswerMode {
        match self {
            Answerer::Rag(_) => AnswerMode::Rag,
            Answerer::Base(_) => AnswerMode::Base,
        }
    }

    async fn answer(&self, question: &str) -> QuestionOutcome {
        match self {
            Answerer::Base(baseline) => QuestionOutcome::Answered {
                answer: baseline.answer(question).await,
            },
            Answerer::Rag(pipeline) => match pipeline.answer(question).await {
                Ok(answer) => QuestionOutcome::Answered { answer },
                Err(e) => QuestionOutcome::Failed {
                    error: e.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuestionOutcome {
    Answered { answer: Answer },
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    /// 1-based position in the question file.
    pub index: usize,
    pub question: String,
    #[serde(flatten)]
    pub outcome: QuestionOutcome,
}

impl QuestionResult {
    /// Text for the `A` column; empty unless an answer was produced.
    pub fn answer_text(&self) -> &str {
        match &self.outcome {
            QuestionOutcome::Answered { answer } => &answer.text,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub answered: usize,
    pub empty: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub ungrounded: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[QuestionResult]) -> Self {
        let mut s = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match &r.outcome {
                QuestionOutcome::Answered { answer } => {
                    if answer.status == AnswerStatus::Answered {
                        s.answered += 1;
                    } else {
                        s.empty += 1;
                    }
                    if !answer.grounding.is_grounded() {
                        s.ungrounded += 1;
                    }
                }
                QuestionOutcome::Failed { .. } => s.failed += 1,
                QuestionOutcome::Cancelled => s.cancelled += 1,
            }
        }
        s
    }
}

/// JSON companion to the answers CSV.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: AnswerMode,
    pub embedding_model: Option<String>,
    pub generation_model: String,
    pub summary: BatchSummary,
    pub results: Vec<QuestionResult>,
}

pub async fn run_batch(
    answerer: &Answerer,
    questions: &[String],
    concurrency: usize,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Vec<QuestionResult> {
    let total = questions.len();
    let done = AtomicUsize::new(0);
    let done = &done;

    let results: Vec<QuestionResult> = stream::iter(questions.iter().enumerate())
        .map(|(i, question)| async move {
            let index = i + 1;
            let outcome = if cancel.is_cancelled() {
                QuestionOutcome::Cancelled
            } else if question.is_empty() {
                QuestionOutcome::Failed {
                    error: "empty question".to_string(),
                }
            } else {
                answerer.answer(question).await
            };
            if let QuestionOutcome::Failed { error } = &outcome {
                warn!(question = index, error = %error, "question failed");
            }
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            progress.report(ProgressEvent::Answered { n, total });
            QuestionResult {
                index,
                question: question.clone(),
                outcome,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let summary = BatchSummary::from_results(&results);
    info!(
        total = summary.total,
        answered = summary.answered,
        empty = summary.empty,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "batch finished"
    );
    results
}

/// Cancel `token` on the first interrupt. Returns `true` once a second
/// interrupt arrives, `false` if the signal source goes away first.
pub async fn watch_interrupts<F, Fut>(mut interrupt: F, token: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !interrupt().await {
        return false;
    }
    warn!("interrupt received; finishing in-flight work (Ctrl-C again to abort)");
    token.cancel();
    interrupt().await
}

/// Rows for the answers CSV, one per question in input order.
pub fn answer_rows(results: &[QuestionResult]) -> Vec<AnswerRow> {
    results
        .iter()
        .map(|r| AnswerRow {
            question: r.question.clone(),
            answer: r.answer_text().to_string(),
        })
        .collect()
}
