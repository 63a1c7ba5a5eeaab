//! Corpus loading: walk the guideline directory and extract documents.
//!
//! Files are selected with include/exclude globs relative to `corpus.root`,
//! converted to text by [`crate::extract`], and returned as core
//! [`Document`]s in path order so chunk order (and therefore tie-breaking in
//! retrieval) is reproducible between runs.
//!
//! A file that cannot be read or extracted is logged and skipped; one bad
//! PDF never aborts the run.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use vignette_rag_core::models::Document;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::extract::{content_type_for, extract_text};

/// A file that was matched but could not be turned into a document.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

pub fn load_corpus(config: &CorpusConfig) -> Result<Corpus> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("corpus.root does not exist or is not a directory: {}", root.display());
    }

    let include = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if exclude.is_match(&relative) || !include.is_match(&relative) {
            continue;
        }
        paths.push((relative, entry.into_path()));
    }
    paths.sort();

    let mut corpus = Corpus::default();
    for (relative, path) in paths {
        match load_document(&path, &relative) {
            Ok(doc) if doc.text.trim().is_empty() => {
                warn!(path = %path.display(), "no extractable text, skipping");
                corpus.skipped.push(SkippedFile {
                    path,
                    reason: "no extractable text".to_string(),
                });
            }
            Ok(doc) => {
                debug!(path = %path.display(), chars = doc.text.len(), "loaded document");
                corpus.documents.push(doc);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "failed to load document, skipping");
                corpus.skipped.push(SkippedFile {
                    path,
                    reason: format!("{:#}", e),
                });
            }
        }
    }
    Ok(corpus)
}

fn load_document(path: &Path, relative: &str) -> Result<Document> {
    let content_type = content_type_for(path)
        .ok_or_else(|| anyhow::anyhow!("unsupported file extension"))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = extract_text(&bytes, content_type)?;
    Ok(Document {
        id: relative.to_string(),
        title: path.file_name().map(|n| n.to_string_lossy().to_string()),
        source_path: Some(path.to_path_buf()),
        content_type: content_type.to_string(),
        text,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
