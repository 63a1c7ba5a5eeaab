//! Per-question answering pipeline.
//!
//! ```text
//! question ─▶ retrieve(top_k) ─▶ filter(min_score) ─▶ rerank(top_n)
//!          ─▶ assemble prompt ─▶ generate (one call) ─▶ Answer
//! ```
//!
//! Failure handling is split by stage. Retrieval and reranking errors are
//! returned as [`PipelineError`] so the caller can record the question as
//! failed. Generation errors are absorbed: the question still gets an
//! [`Answer`], with empty text and [`AnswerStatus::GenerationFailed`], so a
//! batch always produces one row per question.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, ServiceError};
use crate::filter::filter_by_similarity;
use crate::prompt::{Prompt, PromptTemplate};
use crate::rerank::{rerank, RerankProvider};
use crate::retrieve::Retriever;

/// A chat-style text generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Issue one generation call for `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<GenerationResponse, ServiceError>;
}

/// Typed content of a generation response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub segments: Vec<ResponseSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseSegment {
    Text { text: String },
    /// Tool calls, thinking blocks and anything else that is not answer text.
    Other { kind: String },
}

impl GenerationResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![ResponseSegment::Text { text: text.into() }],
        }
    }

    /// The first text segment with non-blank content, trimmed.
    pub fn first_text(&self) -> Option<&str> {
        self.segments.iter().find_map(|s| match s {
            ResponseSegment::Text { text } if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        })
    }
}

/// What to do when no chunk survives filtering and reranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyContextPolicy {
    /// Generate anyway with an empty context block; the answer is marked
    /// [`Grounding::Ungrounded`].
    #[default]
    Answer,
    /// Skip generation and return an empty, abstained answer.
    Abstain,
}

/// Retrieval knobs for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub rerank_top_n: usize,
    pub empty_context: EmptyContextPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: 20,
            min_score: 0.25,
            rerank_top_n: 10,
            empty_context: EmptyContextPolicy::Answer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    /// The model replied without any non-blank text segment.
    EmptyResponse,
    GenerationFailed(String),
    Abstained,
}

/// A chunk that was placed in the prompt, in prompt order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub chunk_index: usize,
    pub similarity: f32,
    pub rerank_score: Option<f32>,
    /// Chunk text, included so `--explain` and run reports are self-contained.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grounding {
    Grounded { sources: Vec<SourceRef> },
    Ungrounded,
}

impl Grounding {
    pub fn is_grounded(&self) -> bool {
        matches!(self, Grounding::Grounded { .. })
    }

    pub fn sources(&self) -> &[SourceRef] {
        match self {
            Grounding::Grounded { sources } => sources,
            Grounding::Ungrounded => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub question: String,
    /// Single trimmed answer text; empty unless `status` is `Answered`.
    pub text: String,
    pub status: AnswerStatus,
    pub grounding: Grounding,
}

/// Retrieval, reranking and generation wired together for one corpus.
///
/// Cheap to clone; every component is shared.
#[derive(Clone)]
pub struct AnsweringPipeline {
    retriever: Retriever,
    reranker: Arc<dyn RerankProvider>,
    generator: Arc<dyn GenerationProvider>,
    template: PromptTemplate,
    settings: PipelineSettings,
}

impl AnsweringPipeline {
    pub fn new(
        retriever: Retriever,
        reranker: Arc<dyn RerankProvider>,
        generator: Arc<dyn GenerationProvider>,
        template: PromptTemplate,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            retriever,
            reranker,
            generator,
            template,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer one question from the corpus.
    pub async fn answer(&self, question: &str) -> Result<Answer, PipelineError> {
        let candidates = self
            .retriever
            .retrieve(question, self.settings.top_k)
            .await?;
        let retrieved = candidates.len();
        let candidates = filter_by_similarity(candidates, self.settings.min_score);
        let filtered = candidates.len();
        let ranked = rerank(
            self.reranker.as_ref(),
            self.retriever.index(),
            question,
            candidates,
            self.settings.rerank_top_n,
        )
        .await?;
        debug!(retrieved, filtered, kept = ranked.len(), "candidate pool");

        let index = self.retriever.index();
        let sources: Vec<SourceRef> = ranked
            .iter()
            .filter_map(|c| {
                index.chunk(c.chunk).map(|chunk| SourceRef {
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    similarity: c.similarity,
                    rerank_score: c.rerank_score,
                    text: chunk.text.clone(),
                })
            })
            .collect();

        let grounding = if sources.is_empty() {
            if self.settings.empty_context == EmptyContextPolicy::Abstain {
                debug!("no context survived filtering; abstaining");
                return Ok(Answer {
                    question: question.to_string(),
                    text: String::new(),
                    status: AnswerStatus::Abstained,
                    grounding: Grounding::Ungrounded,
                });
            }
            warn!("no context survived filtering; answering without guidelines");
            Grounding::Ungrounded
        } else {
            Grounding::Grounded { sources }
        };

        let texts: Vec<&str> = grounding.sources().iter().map(|s| s.text.as_str()).collect();
        let prompt = self.template.assemble(question, &texts);
        Ok(complete(self.generator.as_ref(), question, &prompt, grounding).await)
    }

    /// Answer without retrieval, using the `Question: {question}` prompt.
    pub async fn answer_ungrounded(&self, question: &str) -> Answer {
        let prompt =
            PromptTemplate::baseline(self.template.system()).assemble::<&str>(question, &[]);
        complete(self.generator.as_ref(), question, &prompt, Grounding::Ungrounded).await
    }
}

/// Generation-only answering for baseline runs; needs no index.
#[derive(Clone)]
pub struct BaselineAnswerer {
    generator: Arc<dyn GenerationProvider>,
    template: PromptTemplate,
}

impl BaselineAnswerer {
    pub fn new(generator: Arc<dyn GenerationProvider>, system: impl Into<String>) -> Self {
        Self {
            generator,
            template: PromptTemplate::baseline(system),
        }
    }

    pub async fn answer(&self, question: &str) -> Answer {
        let prompt = self.template.assemble::<&str>(question, &[]);
        complete(self.generator.as_ref(), question, &prompt, Grounding::Ungrounded).await
    }
}

async fn complete(
    generator: &dyn GenerationProvider,
    question: &str,
    prompt: &Prompt,
    grounding: Grounding,
) -> Answer {
    let (text, status) = match generator.generate(prompt).await {
        Ok(response) => match response.first_text() {
            Some(text) => (text.to_string(), AnswerStatus::Answered),
            None => {
                warn!(
                    model = generator.model_name(),
                    "generation returned no text segment"
                );
                (String::new(), AnswerStatus::EmptyResponse)
            }
        },
        Err(e) => {
            warn!(model = generator.model_name(), error = %e, "generation failed");
            (String::new(), AnswerStatus::GenerationFailed(e.to_string()))
        }
    };
    Answer {
        question: question.to_string(),
        text,
        status,
        grounding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_text_skips_blank_and_other_segments() {
        let r = GenerationResponse {
            segments: vec![
                ResponseSegment::Other {
                    kind: "thinking".into(),
                },
                ResponseSegment::Text { text: "  \n".into() },
                ResponseSegment::Text {
                    text: "  Give alteplase.\n".into(),
                },
                ResponseSegment::Text {
                    text: "second".into(),
                },
            ],
        };
        assert_eq!(r.first_text(), Some("Give alteplase."));
    }

    #[test]
    fn test_first_text_none() {
        assert_eq!(GenerationResponse::default().first_text(), None);
        let r = GenerationResponse {
            segments: vec![ResponseSegment::Other {
                kind: "tool_use".into(),
            }],
        };
        assert_eq!(r.first_text(), None);
    }

    #[test]
    fn test_default_settings() {
        let s = PipelineSettings::default();
        assert_eq!(s.top_k, 20);
        assert_eq!(s.rerank_top_n, 10);
        assert!((s.min_score - 0.25).abs() < f32::EPSILON);
        assert_eq!(s.empty_context, EmptyContextPolicy::Answer);
    }

    #[test]
    fn test_policy_serde_names() {
        let p: EmptyContextPolicy = serde_json::from_str("\"abstain\"").unwrap();
        assert_eq!(p, EmptyContextPolicy::Abstain);
        assert_eq!(
            serde_json::to_string(&EmptyContextPolicy::Answer).unwrap(),
            "\"answer\""
        );
    }
}
