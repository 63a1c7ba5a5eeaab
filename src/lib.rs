//! # Vignette RAG
//!
//! Retrieval-augmented answering and rubric grading for clinical vignette
//! questions.
//!
//! A directory of guideline documents is segmented, embedded and held in an
//! in-memory index for the lifetime of one run. Each question is answered
//! from the chunks that survive similarity filtering and cross-encoder
//! reranking; a separate grading pass scores answers against references.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Corpus    │──▶│ Segment+Embed│──▶│ In-memory     │
//! │ PDF/DOCX/MD │   │              │   │ index         │
//! └─────────────┘   └──────────────┘   └──────┬────────┘
//!                                             │
//!         ┌─────────────┐   ┌──────────┐      ▼
//!         │  Generation │◀──│  Rerank  │◀── retrieve + filter
//!         └──────┬──────┘   └──────────┘
//!                ▼
//!         answers.csv ──▶ grade ──▶ graded.csv
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vrag chunks                                   # check corpus segmentation
//! vrag ask "Target BP before thrombolysis?"     # one question
//! vrag answer --questions q.txt --output answers.csv
//! vrag grade --answers answers.csv --references refs.txt --output graded.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`corpus`] | Corpus directory walking |
//! | [`extract`] | PDF/OOXML/text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`rerank`] | Cross-encoder rerank providers |
//! | [`generation`] | Chat generation providers |
//! | [`retry`] | Backoff and HTTP error classification |
//! | [`ingest`] | Index construction and pipeline wiring |
//! | [`batch`] | Bounded-concurrency batch answering |
//! | [`grade`] | Rubric grading |
//! | [`questions`] | Question and reference file parsing |
//! | [`output`] | CSV and JSON artifacts |
//! | [`progress`] | Progress reporting on stderr |

pub mod batch;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod grade;
pub mod ingest;
pub mod output;
pub mod progress;
pub mod questions;
pub mod rerank;
pub mod retry;
