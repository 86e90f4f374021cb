use crate::analysis::{ProtocolAnalyzer, ProtocolGenerator};
use crate::config::Settings;
use crate::domain::model::{
    safe_stem, AnalysisReport, DocumentMetadata, ExtractedText, ImprovedProtocol, Priority,
    Suggestion, UploadedDocument,
};
use crate::domain::ports::{ModelClient, Pipeline, Storage};
use crate::extract;
use crate::utils::error::{ProtocolError, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::{FileOptions, ZipWriter};

pub const SUGGESTIONS_CSV: &str = "suggestions.csv";
pub const ANALYSIS_JSON: &str = "analysis.json";
pub const IMPROVED_TXT: &str = "improved_protocol.txt";

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub improve: bool,
    /// Lowest priority applied when `improve` is set.
    pub min_priority: Priority,
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub filename: String,
    pub document: DocumentMetadata,
    pub report: AnalysisReport,
    pub improved: Option<ImprovedProtocol>,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    filename: &'a str,
    generated_at: String,
    document: &'a DocumentMetadata,
    analysis: &'a AnalysisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestions_applied: Option<usize>,
}

/// Offline run over one protocol file: analyze it, optionally rewrite it, and
/// bundle the results into `{stem}_report.zip`.
pub struct ReportPipeline<S: Storage> {
    storage: S,
    options: ReportOptions,
    analyzer: ProtocolAnalyzer,
    generator: ProtocolGenerator,
    max_file_size: usize,
    allowed_extensions: Vec<String>,
}

impl<S: Storage> ReportPipeline<S> {
    pub fn new(
        storage: S,
        model: Arc<dyn ModelClient>,
        settings: &Settings,
        options: ReportOptions,
    ) -> Self {
        Self {
            storage,
            options,
            analyzer: ProtocolAnalyzer::new(model.clone(), settings),
            generator: ProtocolGenerator::new(model, settings),
            max_file_size: settings.max_file_size_bytes(),
            allowed_extensions: settings.allowed_extensions(),
        }
    }

    fn filename(&self) -> String {
        self.options
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn accepted(&self, suggestions: &[Suggestion]) -> Vec<Suggestion> {
        suggestions
            .iter()
            .filter(|s| s.priority.rank() <= self.options.min_priority.rank())
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for ReportPipeline<S> {
    type Outcome = ReportOutcome;

    async fn extract(&self) -> Result<ExtractedText> {
        let filename = self.filename();
        let extension = extension_of(&self.options.source);
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(ProtocolError::UnsupportedFormat {
                format: format!(".{}", extension),
            });
        }

        let bytes = match tokio::fs::read(&self.options.source).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProtocolError::FileNotFound { name: filename })
            }
            Err(e) => return Err(e.into()),
        };
        extract::ensure_within_limit(bytes.len(), self.max_file_size)?;

        tracing::debug!("Read {} bytes from {}", bytes.len(), self.options.source.display());
        extract::extract_blocking(UploadedDocument::new(filename, None, bytes)).await
    }

    async fn transform(&self, extracted: ExtractedText) -> Result<ReportOutcome> {
        let filename = self.filename();
        let report = self.analyzer.analyze(&extracted.text, &filename).await?;

        let improved = if self.options.improve {
            let accepted = self.accepted(&report.suggestions);
            tracing::info!(
                "Applying {} of {} suggestions (priority {} and above)",
                accepted.len(),
                report.suggestions.len(),
                self.options.min_priority
            );
            Some(self.generator.generate(&extracted.text, &accepted).await?)
        } else {
            None
        };

        Ok(ReportOutcome {
            filename,
            document: extracted.metadata,
            report,
            improved,
        })
    }

    async fn load(&self, outcome: ReportOutcome) -> Result<String> {
        let report_name = format!("{}_report.zip", safe_stem(&outcome.filename));

        let csv_data = suggestions_csv(&outcome.report.suggestions)?;
        let json_data = serde_json::to_string_pretty(&ReportDocument {
            filename: &outcome.filename,
            generated_at: chrono::Utc::now().to_rfc3339(),
            document: &outcome.document,
            analysis: &outcome.report,
            suggestions_applied: outcome.improved.as_ref().map(|i| i.suggestions_applied),
        })?;

        // 建立報告壓縮檔
        let zip_data = {
            let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

            zip.start_file::<_, ()>(SUGGESTIONS_CSV, FileOptions::default())?;
            zip.write_all(&csv_data)?;

            zip.start_file::<_, ()>(ANALYSIS_JSON, FileOptions::default())?;
            zip.write_all(json_data.as_bytes())?;

            if let Some(improved) = &outcome.improved {
                zip.start_file::<_, ()>(IMPROVED_TXT, FileOptions::default())?;
                zip.write_all(improved.text.as_bytes())?;
            }

            zip.finish()?.into_inner()
        };

        tracing::debug!("Writing {} ({} bytes) to storage", report_name, zip_data.len());
        self.storage.write_file(&report_name, &zip_data).await?;

        Ok(self
            .options
            .output_dir
            .join(&report_name)
            .display()
            .to_string())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

fn suggestions_csv(suggestions: &[Suggestion]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "index",
        "priority",
        "category",
        "location",
        "issue",
        "suggestion",
        "example",
    ])?;

    for (index, s) in suggestions.iter().enumerate() {
        writer.write_record([
            index.to_string().as_str(),
            s.priority.as_str(),
            s.category.as_str(),
            s.location.as_str(),
            s.description.as_str(),
            s.suggestion.as_str(),
            s.example.as_deref().unwrap_or(""),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ProtocolError::IoError(e.into_error()))
}
