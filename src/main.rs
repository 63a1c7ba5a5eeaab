//! # Vignette RAG CLI (`vrag`)
//!
//! ## Usage
//!
//! ```bash
//! vrag --config ./config/vrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vrag chunks` | Load and segment the corpus without embedding |
//! | `vrag ask "<question>"` | Answer one question |
//! | `vrag answer` | Answer a question file into a Q/A CSV |
//! | `vrag grade` | Grade a Q/A CSV against reference answers |
//!
//! API keys are read from the environment, after loading `.env` if present:
//! `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `VOYAGE_API_KEY`.
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default
//! `vignette_rag=info,vignette_rag_core=info`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vignette_rag::batch::{
    answer_rows, run_batch, watch_interrupts, AnswerMode, Answerer, BatchSummary, RunReport,
};
use vignette_rag::config::{self, Config, Credentials};
use vignette_rag::generation::create_generator;
use vignette_rag::grade::{graded_rows, GradeSummary, Grader};
use vignette_rag::ingest::{build_baseline, build_pipeline, segment_corpus};
use vignette_rag::output;
use vignette_rag::progress::ProgressMode;
use vignette_rag::questions::{read_questions, read_references};
use vignette_rag_core::pipeline::{Answer, AnswerStatus};

/// Vignette RAG: answer clinical vignette questions from a guideline corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vrag",
    about = "Retrieval-augmented answering and grading for clinical vignette questions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vrag.toml")]
    config: PathBuf,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Progress output on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and segment the corpus and print per-document chunk counts.
    ///
    /// Makes no network calls.
    Chunks,

    /// Answer a single question and print the answer.
    Ask {
        question: String,

        #[arg(long, value_enum, default_value = "rag")]
        mode: AnswerMode,

        /// Also print the chunks that were placed in the prompt.
        #[arg(long)]
        explain: bool,
    },

    /// Answer every question in a file and write a Q/A CSV.
    Answer {
        /// Question file: one question per line, optional `Q:` prefix.
        #[arg(long)]
        questions: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "rag")]
        mode: AnswerMode,

        /// Write a JSON run report with per-question status and sources.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Override `batch.concurrency`.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Grade a Q/A CSV against reference answers.
    Grade {
        #[arg(long)]
        answers: PathBuf,

        /// Reference file: answers separated by `A: ` markers.
        #[arg(long)]
        references: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Write the grade summary as JSON.
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vignette_rag=info,vignette_rag_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Cancel `token` on the first Ctrl-C; in-flight questions still finish.
/// A second Ctrl-C exits immediately.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
        if watch_interrupts(ctrl_c, token).await {
            warn!("second interrupt received; aborting");
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Chunks => run_chunks(&cfg)?,
        Commands::Ask {
            question,
            mode,
            explain,
        } => {
            let credentials = Credentials::from_env();
            let answer = match mode {
                AnswerMode::Rag => {
                    build_pipeline(&cfg, &credentials, progress.as_ref())
                        .await?
                        .answer(&question)
                        .await?
                }
                AnswerMode::Base => build_baseline(&cfg, &credentials)?.answer(&question).await,
            };
            print_answer(&answer, explain);
        }
        Commands::Answer {
            questions,
            output: out_path,
            mode,
            report,
            concurrency,
        } => {
            let credentials = Credentials::from_env();
            let questions = read_questions(&questions)?;
            info!(questions = questions.len(), ?mode, "starting batch");

            let started_at = Utc::now();
            let (answerer, embedding_model) = match mode {
                AnswerMode::Rag => {
                    let pipeline = build_pipeline(&cfg, &credentials, progress.as_ref()).await?;
                    let model = pipeline.retriever().index().model_name().to_string();
                    (Answerer::Rag(pipeline), Some(model))
                }
                AnswerMode::Base => (
                    Answerer::Base(build_baseline(&cfg, &credentials)?),
                    None,
                ),
            };

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let results = run_batch(
                &answerer,
                &questions,
                concurrency.unwrap_or(cfg.batch.concurrency),
                &cancel,
                progress.as_ref(),
            )
            .await;

            output::write_answers_file(&out_path, &answer_rows(&results))?;
            let summary = BatchSummary::from_results(&results);
            println!("answer {}", out_path.display());
            println!("  questions: {}", summary.total);
            println!("  answered: {}", summary.answered);
            println!("  empty: {}", summary.empty);
            println!("  failed: {}", summary.failed);
            println!("  cancelled: {}", summary.cancelled);
            if mode == AnswerMode::Rag {
                println!("  ungrounded: {}", summary.ungrounded);
            }

            if let Some(path) = report {
                let report = RunReport {
                    run_id: Uuid::new_v4(),
                    started_at,
                    finished_at: Utc::now(),
                    mode: answerer.mode(),
                    embedding_model,
                    generation_model: cfg.generation.model.clone(),
                    summary,
                    results,
                };
                output::write_json_file(&path, &report)?;
                println!("  report: {}", path.display());
            }
        }
        Commands::Grade {
            answers,
            references,
            output: out_path,
            summary: summary_path,
        } => {
            let credentials = Credentials::from_env();
            let rows = output::read_answers_file(&answers)?;
            let references = read_references(&references)?;
            let generator = create_generator(&cfg.grading_generation(), &credentials)?;
            let grader = Grader::new(generator, Duration::from_millis(cfg.grading.delay_ms));

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let outcomes = grader
                .grade_all(&rows, &references, &cancel, progress.as_ref())
                .await;

            output::write_graded_file(&out_path, &graded_rows(&rows, &outcomes))?;
            let summary = GradeSummary::from_outcomes(&outcomes);
            println!("grade {}", out_path.display());
            println!("  rows: {}", summary.total);
            println!("  graded: {}", summary.graded);
            println!("  total score: {:.1}", summary.total_score);
            println!("  average: {:.3}", summary.average);
            println!(
                "  correct / partial / wrong: {} / {} / {}",
                summary.correct, summary.partial, summary.wrong
            );
            println!("  ungraded: {}", summary.ungraded);
            if let Some(path) = summary_path {
                output::write_json_file(&path, &summary)?;
            }
        }
    }

    Ok(())
}

fn run_chunks(cfg: &Config) -> Result<()> {
    let (corpus, chunks) = segment_corpus(cfg)?;
    for doc in &corpus.documents {
        let count = chunks.iter().filter(|c| c.document_id == doc.id).count();
        println!("{:>6}  {}", count, doc.id);
    }
    for skipped in &corpus.skipped {
        println!("  skip  {} ({})", skipped.path.display(), skipped.reason);
    }
    println!(
        "{} chunks from {} documents ({} skipped)",
        chunks.len(),
        corpus.documents.len(),
        corpus.skipped.len()
    );
    Ok(())
}

fn print_answer(answer: &Answer, explain: bool) {
    match &answer.status {
        AnswerStatus::Answered => println!("{}", answer.text),
        AnswerStatus::EmptyResponse => println!("(model returned no text)"),
        AnswerStatus::Abstained => println!("(no relevant guideline context; not answered)"),
        AnswerStatus::GenerationFailed(reason) => println!("(generation failed: {})", reason),
    }
    if !explain {
        return;
    }
    if !answer.grounding.is_grounded() {
        println!("\n(ungrounded)");
        return;
    }
    println!();
    for (i, source) in answer.grounding.sources().iter().enumerate() {
        println!(
            "[{}] {} #{}  similarity={:.3}  rerank={}",
            i + 1,
            source.document_id,
            source.chunk_index,
            source.similarity,
            source
                .rerank_score
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".to_string())
        );
        let preview: String = source.text.chars().take(240).collect();
        println!("    {}", preview.replace('\n', " "));
    }
}
