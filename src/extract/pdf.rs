use super::corrupt;
use crate::domain::model::{DocumentFormat, DocumentMetadata, ExtractedText};
use crate::utils::error::Result;
use lopdf::{Dictionary, Document, Object};

const HEADER_SEARCH_WINDOW: usize = 1024;

/// Extract text and metadata from PDF bytes.
///
/// Encrypted and structurally broken files are reported as corrupt. The text
/// itself comes from `pdf-extract`, which handles CID fonts and ToUnicode maps.
pub fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    if !window.windows(5).any(|w| w == b"%PDF-") {
        return Err(corrupt(DocumentFormat::Pdf, "missing %PDF header"));
    }

    let doc = Document::load_mem(bytes)
        .map_err(|e| corrupt(DocumentFormat::Pdf, format!("failed to load PDF: {}", e)))?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(corrupt(
            DocumentFormat::Pdf,
            "encrypted PDFs are not supported",
        ));
    }

    let pages = doc.get_pages().len();
    let info = info_dictionary(&doc);
    let title = info.and_then(|d| string_entry(d, b"Title")).unwrap_or_default();
    let author = info.and_then(|d| string_entry(d, b"Author")).unwrap_or_default();

    // pdf-extract 遇到少見的字型編碼時可能 panic
    let raw = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| corrupt(DocumentFormat::Pdf, "PDF text extraction aborted"))?
        .map_err(|e| corrupt(DocumentFormat::Pdf, format!("text extraction failed: {}", e)))?;

    tracing::debug!("Extracted {} characters from {} PDF pages", raw.len(), pages);

    Ok(ExtractedText {
        text: normalize_whitespace(&raw),
        metadata: DocumentMetadata {
            file_type: DocumentFormat::Pdf.as_str().to_string(),
            pages: Some(pages),
            paragraphs: None,
            title,
            author,
            extraction_method: "pdf-extract".to_string(),
        },
    })
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn string_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => {
            let value = decode_pdf_string(bytes);
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a BOM or a single-byte encoding.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
    }

    bytes.iter().map(|&b| b as char).collect()
}

/// Trims trailing spaces and collapses runs of blank lines left by the layout engine.
fn normalize_whitespace(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || lines.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}
