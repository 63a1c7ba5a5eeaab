//! Corpus loading across the supported file formats.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::TempDir;
use vignette_rag::config::{parse_config, Config};
use vignette_rag::corpus::load_corpus;
use vignette_rag::extract::{MIME_DOCX, MIME_MARKDOWN, MIME_PDF, MIME_PPTX};
use vignette_rag::ingest::segment_corpus;

/// Minimal PDF whose single page draws "alteplase window".
/// Body first, then an xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (alteplase window) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    zip_with(&[(
        "word/document.xml",
        format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        ),
    )])
}

fn minimal_pptx_with_slides(slides: &[&str]) -> Vec<u8> {
    let entries: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:spTree></p:cSld></p:sld>",
                    text
                ),
            )
        })
        .collect();
    let refs: Vec<(&str, String)> = entries
        .iter()
        .map(|(n, b)| (n.as_str(), b.clone()))
        .collect();
    zip_with(&refs)
}

fn config_for(root: &Path, extra: &str) -> Config {
    parse_config(&format!(
        "[corpus]\nroot = \"{}\"\n{}\n[chunking]\nmax_tokens = 64\noverlap_tokens = 16\n",
        root.display(),
        extra
    ))
    .unwrap()
}

#[test]
fn test_office_formats_are_loaded() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("tpa.docx"),
        minimal_docx_with_text("Alteplase within 4.5 hours"),
    )
    .unwrap();
    fs::write(
        tmp.path().join("deck.pptx"),
        minimal_pptx_with_slides(&["Door to needle", "Under 60 minutes"]),
    )
    .unwrap();
    fs::write(tmp.path().join("readme.md"), "# Readme\n\nStroke units.\n").unwrap();

    let corpus = load_corpus(&config_for(tmp.path(), "").corpus).unwrap();

    let ids: Vec<&str> = corpus.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["deck.pptx", "readme.md", "tpa.docx"]);
    assert_eq!(corpus.documents[0].content_type, MIME_PPTX);
    assert_eq!(corpus.documents[0].text, "Door to needle\n\nUnder 60 minutes");
    assert_eq!(corpus.documents[1].content_type, MIME_MARKDOWN);
    assert_eq!(corpus.documents[2].content_type, MIME_DOCX);
    assert_eq!(corpus.documents[2].text, "Alteplase within 4.5 hours");
    assert!(corpus.skipped.is_empty());
}

#[test]
fn test_bad_files_are_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(tmp.path().join("bad.docx"), b"not a zip").unwrap();
    fs::write(tmp.path().join("blank.txt"), "  \n\n").unwrap();
    fs::write(tmp.path().join("good.md"), "# Good\n\nAspirin after stroke.\n").unwrap();

    let corpus = load_corpus(&config_for(tmp.path(), "").corpus).unwrap();

    assert_eq!(corpus.documents.len(), 1);
    assert_eq!(corpus.documents[0].id, "good.md");
    let mut skipped: Vec<String> = corpus
        .skipped
        .iter()
        .map(|s| s.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    skipped.sort();
    assert_eq!(skipped, vec!["bad.docx", "bad.pdf", "blank.txt"]);
}

#[test]
fn test_minimal_pdf_is_loaded_or_skipped() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("window.pdf"), minimal_pdf_with_phrase()).unwrap();

    let corpus = load_corpus(&config_for(tmp.path(), "").corpus).unwrap();

    // Some pdf-extract versions yield no text for the bare Type1 font; the
    // file must then be skipped rather than fail the load.
    assert_eq!(corpus.documents.len() + corpus.skipped.len(), 1);
    if let Some(doc) = corpus.documents.first() {
        assert_eq!(doc.content_type, MIME_PDF);
        assert!(doc.text.contains("alteplase"));
    }
}

#[test]
fn test_exclude_globs_and_git_dir() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("drafts")).unwrap();
    fs::create_dir_all(tmp.path().join(".git")).unwrap();
    fs::write(tmp.path().join("drafts").join("old.md"), "old draft").unwrap();
    fs::write(tmp.path().join(".git").join("notes.txt"), "git internals").unwrap();
    fs::write(tmp.path().join("final.md"), "final guideline").unwrap();

    let config = config_for(tmp.path(), "exclude_globs = [\"drafts/**\"]");
    let corpus = load_corpus(&config.corpus).unwrap();

    let ids: Vec<&str> = corpus.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["final.md"]);
}

#[test]
fn test_segmenting_covers_every_document() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.md"), "Aspirin. ".repeat(100)).unwrap();
    fs::write(tmp.path().join("b.txt"), "Short note.").unwrap();

    let (corpus, chunks) = segment_corpus(&config_for(tmp.path(), "")).unwrap();

    assert_eq!(corpus.documents.len(), 2);
    let a_chunks: Vec<_> = chunks.iter().filter(|c| c.document_id == "a.md").collect();
    let b_chunks: Vec<_> = chunks.iter().filter(|c| c.document_id == "b.txt").collect();
    assert!(a_chunks.len() > 1);
    assert_eq!(b_chunks.len(), 1);
    assert_eq!(b_chunks[0].text, "Short note.");
    for (i, c) in a_chunks.iter().enumerate() {
        assert_eq!(c.chunk_index, i);
        assert!(c.char_len() <= 64 * 4);
    }
}
