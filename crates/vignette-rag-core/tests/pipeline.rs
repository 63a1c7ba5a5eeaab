//! End-to-end pipeline tests with in-memory providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vignette_rag_core::chunk::Segmenter;
use vignette_rag_core::embedding::EmbeddingProvider;
use vignette_rag_core::index::EmbeddingIndex;
use vignette_rag_core::models::Document;
use vignette_rag_core::pipeline::{
    AnswerStatus, AnsweringPipeline, BaselineAnswerer, EmptyContextPolicy, GenerationProvider,
    GenerationResponse, Grounding, PipelineSettings, ResponseSegment,
};
use vignette_rag_core::prompt::{Prompt, PromptTemplate};
use vignette_rag_core::rerank::RerankProvider;
use vignette_rag_core::retrieve::Retriever;
use vignette_rag_core::{IndexError, PipelineError, ServiceError};

const VOCAB: &[&str] = &[
    "aspirin",
    "stroke",
    "alteplase",
    "thrombolysis",
    "blood",
    "pressure",
    "statin",
    "cholesterol",
];

/// Bag-of-words embedder over a tiny clinical vocabulary.
struct KeywordEmbedder {
    model: &'static str,
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        self.model
    }
    fn dims(&self) -> usize {
        VOCAB.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                VOCAB.iter().map(|w| t.matches(w).count() as f32).collect()
            })
            .collect())
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> usize {
        VOCAB.len()
    }
    async fn embed(&self, _: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::transient("keywords", "503 Service Unavailable"))
    }
}

struct OverlapReranker;

#[async_trait]
impl RerankProvider for OverlapReranker {
    fn model_name(&self) -> &str {
        "overlap"
    }
    async fn score(&self, question: &str, documents: &[String]) -> Result<Vec<f32>, ServiceError> {
        let q = question.to_lowercase();
        Ok(documents
            .iter()
            .map(|d| {
                let d = d.to_lowercase();
                q.split_whitespace()
                    .filter(|w| w.len() > 3 && d.contains(*w))
                    .count() as f32
            })
            .collect())
    }
}

/// Returns a canned response and records every prompt it receives.
struct ScriptedGenerator {
    response: Result<GenerationResponse, ServiceError>,
    prompts: Mutex<Vec<Prompt>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(response: Result<GenerationResponse, ServiceError>) -> Self {
        Self {
            response,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, prompt: &Prompt) -> Result<GenerationResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        self.response.clone()
    }
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "aspirin.txt",
            "Aspirin 160 to 325 mg is recommended within 24 to 48 hours after ischemic stroke onset.",
        ),
        Document::new(
            "pressure.txt",
            "Blood pressure should be lowered below 185/110 before thrombolysis with alteplase.",
        ),
        Document::new(
            "statin.txt",
            "High-intensity statin therapy lowers cholesterol after stroke.",
        ),
    ]
}

async fn retriever() -> Retriever {
    let embedder = Arc::new(KeywordEmbedder { model: "keywords" });
    let chunks = Segmenter::from_tokens(512, 128)
        .unwrap()
        .segment_all(&corpus());
    let index = EmbeddingIndex::build(embedder.as_ref(), chunks, 16)
        .await
        .unwrap();
    Retriever::new(Arc::new(index), embedder).unwrap()
}

async fn pipeline(
    generator: Arc<ScriptedGenerator>,
    settings: PipelineSettings,
) -> AnsweringPipeline {
    AnsweringPipeline::new(
        retriever().await,
        Arc::new(OverlapReranker),
        generator,
        PromptTemplate::default(),
        settings,
    )
}

#[tokio::test]
async fn test_aspirin_question_is_grounded_in_aspirin_guideline() {
    let generator = Arc::new(ScriptedGenerator::new(Ok(GenerationResponse::text(
        "  Start aspirin 160 to 325 mg within 24 to 48 hours because early antiplatelet therapy reduces recurrence.\n",
    ))));
    let p = pipeline(generator.clone(), PipelineSettings::default()).await;

    let answer = p
        .answer("When should aspirin be started after ischemic stroke?")
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Answered);
    assert!(answer.text.starts_with("Start aspirin"));
    assert!(!answer.text.ends_with('\n'));
    let sources = answer.grounding.sources();
    assert!(!sources.is_empty());
    assert_eq!(sources[0].document_id, "aspirin.txt");
    assert!(sources.iter().all(|s| s.similarity >= 0.25));

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[0].user.contains("Aspirin 160 to 325 mg"));
    assert!(prompts[0]
        .user
        .ends_with("Question: When should aspirin be started after ischemic stroke?"));
}

#[tokio::test]
async fn test_unrelated_question_answers_with_empty_context_by_default() {
    let generator = Arc::new(ScriptedGenerator::new(Ok(GenerationResponse::text(
        "Paris is the capital of France.",
    ))));
    let p = pipeline(generator.clone(), PipelineSettings::default()).await;

    let answer = p.answer("What is the capital of France?").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Answered);
    assert_eq!(answer.grounding, Grounding::Ungrounded);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.prompts.lock().unwrap()[0].context_block, "");
}

#[tokio::test]
async fn test_abstain_policy_skips_generation() {
    let generator = Arc::new(ScriptedGenerator::new(Ok(GenerationResponse::text("x"))));
    let settings = PipelineSettings {
        empty_context: EmptyContextPolicy::Abstain,
        ..PipelineSettings::default()
    };
    let p = pipeline(generator.clone(), settings).await;

    let answer = p.answer("What is the capital of France?").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::Abstained);
    assert_eq!(answer.text, "");
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_response_without_text_is_empty_answer() {
    let generator = Arc::new(ScriptedGenerator::new(Ok(GenerationResponse {
        segments: vec![ResponseSegment::Other {
            kind: "tool_use".into(),
        }],
    })));
    let p = pipeline(generator, PipelineSettings::default()).await;

    let answer = p.answer("Is aspirin given after stroke?").await.unwrap();

    assert_eq!(answer.status, AnswerStatus::EmptyResponse);
    assert_eq!(answer.text, "");
    assert!(answer.grounding.is_grounded());
}

#[tokio::test]
async fn test_generation_failure_becomes_empty_answer() {
    let generator = Arc::new(ScriptedGenerator::new(Err(ServiceError::permanent(
        "scripted",
        "401 Unauthorized",
    ))));
    let p = pipeline(generator, PipelineSettings::default()).await;

    let answer = p.answer("Is aspirin given after stroke?").await.unwrap();

    assert_eq!(answer.text, "");
    assert!(matches!(answer.status, AnswerStatus::GenerationFailed(ref m) if m.contains("401")));
}

#[tokio::test]
async fn test_baseline_skips_retrieval() {
    let generator = Arc::new(ScriptedGenerator::new(Ok(GenerationResponse::text(
        "Give aspirin within 48 hours.",
    ))));
    let p = pipeline(generator.clone(), PipelineSettings::default()).await;

    let answer = p.answer_ungrounded("When is aspirin started?").await;

    assert_eq!(answer.status, AnswerStatus::Answered);
    assert_eq!(answer.grounding, Grounding::Ungrounded);
    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts[0].user, "Question: When is aspirin started?");
    assert_eq!(prompts[0].system, PromptTemplate::default().system());
}

#[tokio::test]
async fn test_baseline_answerer_needs_no_index() {
    let generator = Arc::new(ScriptedGenerator::new(Ok(GenerationResponse::text(
        "Lower it below 185/110.",
    ))));
    let baseline = BaselineAnswerer::new(generator.clone(), "Answer briefly.");

    let answer = baseline.answer("Target BP before alteplase?").await;

    assert_eq!(answer.text, "Lower it below 185/110.");
    assert_eq!(answer.grounding, Grounding::Ungrounded);
    let prompts = generator.prompts.lock().unwrap();
    assert_eq!(prompts[0].system, "Answer briefly.");
    assert_eq!(prompts[0].user, "Question: Target BP before alteplase?");
}

#[tokio::test]
async fn test_retrieval_failure_is_pipeline_error() {
    let good = retriever().await;
    let index = Arc::new(
        EmbeddingIndex::from_embedded(
            "keywords",
            VOCAB.len(),
            good.index()
                .iter()
                .map(|e| (e.chunk.clone(), e.vector.clone()))
                .collect(),
        )
        .unwrap(),
    );
    let failing = Retriever::new(index, Arc::new(FailingEmbedder)).unwrap();
    let p = AnsweringPipeline::new(
        failing,
        Arc::new(OverlapReranker),
        Arc::new(ScriptedGenerator::new(Ok(GenerationResponse::text("x")))),
        PromptTemplate::default(),
        PipelineSettings::default(),
    );

    let err = p.answer("aspirin?").await.unwrap_err();
    assert!(matches!(err, PipelineError::Retrieval(ref e) if e.is_transient()));
}

#[tokio::test]
async fn test_retriever_rejects_other_model() {
    let good = retriever().await;
    let index = Arc::new(
        EmbeddingIndex::from_embedded(
            "keywords",
            VOCAB.len(),
            good.index()
                .iter()
                .map(|e| (e.chunk.clone(), e.vector.clone()))
                .collect(),
        )
        .unwrap(),
    );
    let err = Retriever::new(index, Arc::new(KeywordEmbedder { model: "other" }))
        .err()
        .unwrap();
    assert!(matches!(err, IndexError::ModelMismatch { .. }));
}

#[tokio::test]
async fn test_retrieval_orders_by_similarity() {
    let r = retriever().await;
    let hits = r.retrieve("blood pressure before alteplase", 3).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    let best = r.index().chunk(hits[0].chunk).unwrap();
    assert_eq!(best.document_id, "pressure.txt");
}
