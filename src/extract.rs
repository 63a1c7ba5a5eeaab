//! Plain-text extraction for corpus files.
//!
//! PDFs go through `pdf-extract`. DOCX and PPTX are ZIP containers whose text
//! runs live in `w:t` / `a:t` elements. Markdown and plain text are read as
//! UTF-8. Extraction never panics; callers skip the file on error.

use std::io::Read;
use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("file is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// MIME type for a corpus file, from its extension.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "txt" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extract plain text from file bytes of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        MIME_DOCX => {
            let xml = read_zip_entry(bytes, "word/document.xml")?;
            collect_text_runs(&xml, b"p")
        }
        MIME_PPTX => extract_pptx(bytes),
        MIME_MARKDOWN | MIME_TEXT => Ok(String::from_utf8(bytes.to_vec())?),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn read_zip_entry(bytes: &[u8], name: &str) -> Result<Vec<u8>, ExtractError> {
    read_bounded(&mut open_zip(bytes)?, name)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    slides.sort();

    let mut out = String::new();
    for (_, name) in slides {
        let xml = read_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Concatenate every `<*:t>` text run, ending each `<*:{paragraph}>` with a
/// newline so the segmenter can still see line and paragraph boundaries.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                name if name == paragraph => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
