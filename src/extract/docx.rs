use super::corrupt;
use crate::domain::model::{DocumentFormat, DocumentMetadata, ExtractedText};
use crate::utils::error::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use zip::result::ZipError;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";
const CORE_PROPERTIES_PART: &str = "docProps/core.xml";

/// Extract text from a WordprocessingML (.docx) package.
///
/// Each paragraph becomes one line. Table cells are paragraphs too and appear
/// in document order; only paragraphs outside tables are counted in metadata.
pub fn extract_docx(bytes: &[u8]) -> Result<ExtractedText> {
    if !bytes.starts_with(b"PK\x03\x04") {
        return Err(corrupt(
            DocumentFormat::Docx,
            "not a ZIP container (legacy binary .doc files are not supported)",
        ));
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| corrupt(DocumentFormat::Docx, format!("invalid ZIP container: {}", e)))?;

    let document_xml = read_part(&mut archive, DOCUMENT_PART)?.ok_or_else(|| {
        corrupt(
            DocumentFormat::Docx,
            format!("missing {} part", DOCUMENT_PART),
        )
    })?;
    let body = parse_document_xml(&document_xml)?;

    let (title, author) = match read_part(&mut archive, CORE_PROPERTIES_PART)? {
        Some(xml) => parse_core_properties(&xml),
        None => (String::new(), String::new()),
    };

    tracing::debug!(
        "Extracted {} lines ({} body paragraphs) from DOCX",
        body.lines.len(),
        body.paragraphs
    );

    Ok(ExtractedText {
        text: body.lines.join("\n"),
        metadata: DocumentMetadata {
            file_type: DocumentFormat::Docx.as_str().to_string(),
            pages: None,
            paragraphs: Some(body.paragraphs),
            title,
            author,
            extraction_method: "quick-xml".to_string(),
        },
    })
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(corrupt(
                DocumentFormat::Docx,
                format!("cannot open {}: {}", name, e),
            ))
        }
    };

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| corrupt(DocumentFormat::Docx, format!("cannot read {}: {}", name, e)))?;
    Ok(Some(content))
}

#[derive(Debug, Default)]
struct DocumentBody {
    lines: Vec<String>,
    paragraphs: usize,
}

impl DocumentBody {
    fn finish_paragraph(&mut self, current: &mut String, table_depth: usize) {
        let line = current.trim_end();
        if !line.trim().is_empty() {
            self.lines.push(line.to_string());
            if table_depth == 0 {
                self.paragraphs += 1;
            }
        }
        current.clear();
    }
}

fn parse_document_xml(xml: &str) -> Result<DocumentBody> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut body = DocumentBody::default();
    let mut current = String::new();
    let mut table_depth = 0usize;
    let mut in_paragraph = false;
    let mut in_run = false;
    let mut in_text = false;
    // mc:Fallback 重複 mc:Choice 的內容，整段略過
    let mut fallback_depth = 0usize;

    loop {
        let event = reader.read_event();
        if fallback_depth > 0 && !matches!(event, Ok(Event::Eof) | Err(_)) {
            match &event {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"Fallback" => {
                    fallback_depth += 1
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == b"Fallback" => {
                    fallback_depth -= 1
                }
                _ => {}
            }
            continue;
        }

        match event {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    // 文字方塊內可能有巢狀段落，先輸出外層已累積的內容
                    if in_paragraph {
                        body.finish_paragraph(&mut current, table_depth);
                    }
                    in_paragraph = true;
                }
                b"r" => in_run = true,
                b"t" if in_run => in_text = true,
                b"tbl" => table_depth += 1,
                b"Fallback" => fallback_depth += 1,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" if in_run => current.push('\t'),
                b"br" | b"cr" if in_run => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| {
                    corrupt(DocumentFormat::Docx, format!("invalid text escape: {}", e))
                })?;
                current.push_str(&text);
            }
            Ok(Event::CData(t)) if in_text => {
                current.push_str(&String::from_utf8_lossy(t.as_ref()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => in_run = false,
                b"p" => {
                    body.finish_paragraph(&mut current, table_depth);
                    in_paragraph = false;
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(corrupt(
                    DocumentFormat::Docx,
                    format!(
                        "malformed document XML at byte {}: {}",
                        reader.buffer_position(),
                        e
                    ),
                ))
            }
            _ => {}
        }
    }

    Ok(body)
}

/// Title and author from the package core properties. Missing values are empty.
fn parse_core_properties(xml: &str) -> (String, String) {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut title = String::new();
    let mut author = String::new();
    let mut reading: Option<bool> = None; // Some(true) = title, Some(false) = creator

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                reading = match e.local_name().as_ref() {
                    b"title" => Some(true),
                    b"creator" => Some(false),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                if let (Some(is_title), Ok(text)) = (reading, t.unescape()) {
                    if is_title {
                        title.push_str(&text);
                    } else {
                        author.push_str(&text);
                    }
                }
            }
            Ok(Event::End(_)) => reading = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Ignoring malformed DOCX core properties: {}", e);
                break;
            }
            _ => {}
        }
    }

    (title, author)
}
