//! Plain-text extraction from uploaded protocol documents.
//!
//! Parsing itself is delegated to `pdf-extract`/`lopdf` for PDF and to
//! `zip` + `quick-xml` for DOCX. Every successful extraction yields non-empty
//! text; anything else is reported as a [`ProtocolError`].

mod docx;
mod pdf;

use crate::domain::model::{DocumentFormat, ExtractedText, UploadedDocument};
use crate::utils::error::{ProtocolError, Result};

pub use docx::extract_docx;
pub use pdf::extract_pdf;

#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extracts text from an upload, resolving its format from the file name or MIME type.
    pub fn extract(&self, document: &UploadedDocument) -> Result<ExtractedText> {
        let format = document
            .format()
            .ok_or_else(|| ProtocolError::UnsupportedFormat {
                format: describe_format(document),
            })?;

        tracing::debug!(
            "Extracting {} text from {} ({} bytes)",
            format.label(),
            document.filename,
            document.size()
        );

        self.extract_bytes(format, &document.bytes)
    }

    pub fn extract_bytes(&self, format: DocumentFormat, bytes: &[u8]) -> Result<ExtractedText> {
        let extracted = match format {
            DocumentFormat::Pdf => extract_pdf(bytes)?,
            DocumentFormat::Docx => extract_docx(bytes)?,
        };

        if extracted.text.trim().is_empty() {
            return Err(ProtocolError::EmptyDocument {
                format: format.label().to_string(),
            });
        }

        Ok(extracted)
    }
}

fn describe_format(document: &UploadedDocument) -> String {
    std::path::Path::new(&document.filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .or_else(|| document.content_type.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// First `max_chars` characters of `text`, with `...` appended when truncated.
pub fn preview_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

/// Runs extraction on the blocking pool; parsing large documents is CPU bound.
pub async fn extract_blocking(document: UploadedDocument) -> Result<ExtractedText> {
    tokio::task::spawn_blocking(move || TextExtractor::new().extract(&document))
        .await
        .map_err(|e| {
            ProtocolError::IoError(std::io::Error::other(format!(
                "extraction task failed: {}",
                e
            )))
        })?
}

pub fn ensure_within_limit(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(ProtocolError::FileTooLarge { size, limit });
    }
    Ok(())
}

pub(crate) fn corrupt(format: DocumentFormat, message: impl Into<String>) -> ProtocolError {
    ProtocolError::CorruptFile {
        format: format.label().to_string(),
        message: message.into(),
    }
}
