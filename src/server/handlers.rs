use super::AppState;
use crate::adapters::storage::is_plain_file_name;
use crate::domain::model::{
    safe_stem, AnalysisReport, DocumentMetadata, Suggestion, UploadedDocument,
};
use crate::domain::ports::Storage;
use crate::extract::{self, preview_text};
use crate::store::StoredAnalysis;
use crate::utils::error::{ProtocolError, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub api_connection: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub file_size: usize,
    pub text_length: usize,
    pub preview: String,
    pub metadata: DocumentMetadata,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_analyses: usize,
    pub total_improved: usize,
    pub cache_size: usize,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis_id: String,
    pub filename: String,
    #[serde(flatten)]
    pub report: AnalysisReport,
    pub document: DocumentMetadata,
}

/// Either an `analysis_id` with the indices of accepted suggestions, or the
/// protocol text with the suggestions to apply.
#[derive(Debug, Default, Deserialize)]
pub struct ImproveRequest {
    #[serde(default)]
    pub analysis_id: Option<String>,
    #[serde(default)]
    pub accepted_indices: Vec<usize>,
    #[serde(default)]
    pub original_text: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImproveResponse {
    pub success: bool,
    pub improved_protocol: String,
    pub output_filename: Option<String>,
    pub suggestions_applied: usize,
    pub message: String,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Protocol Improver API",
        version: env!("CARGO_PKG_VERSION"),
        status: "healthy",
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.model.quick_check().await;

    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" },
        api_connection: if connected { "ok" } else { "failed" },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let document = read_upload(&state, multipart).await?;
    let filename = document.filename.clone();
    let file_size = document.size();

    let extracted = extract::extract_blocking(document).await?;
    info!(
        "📄 Uploaded {} ({} bytes, {} characters)",
        filename,
        file_size,
        extracted.char_count()
    );

    Ok(Json(UploadResponse {
        success: true,
        filename,
        file_size,
        text_length: extracted.char_count(),
        preview: preview_text(&extracted.text, PREVIEW_CHARS),
        metadata: extracted.metadata,
        message: "File uploaded and processed successfully".to_string(),
    }))
}

pub async fn analyze(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>> {
    let document = read_upload(&state, multipart).await?;
    let filename = document.filename.clone();

    let extracted = extract::extract_blocking(document).await?;
    let report = state.analyzer.analyze(&extracted.text, &filename).await?;

    let analysis_id = state
        .store
        .insert(StoredAnalysis::new(
            extracted.text,
            filename.clone(),
            report.clone(),
        ))
        .await;
    info!("🗂️ Stored analysis {} for {}", analysis_id, filename);

    Ok(Json(AnalyzeResponse {
        success: true,
        analysis_id,
        filename,
        report,
        document: extracted.metadata,
    }))
}

pub async fn improve(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ImproveRequest>, JsonRejection>,
) -> Result<Json<ImproveResponse>> {
    let Json(request) = payload.map_err(|e| ProtocolError::InvalidRequest {
        message: e.body_text(),
    })?;

    let analysis_id = request
        .analysis_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let (original_text, filename, accepted) = match analysis_id {
        Some(id) => {
            let stored = state
                .store
                .get(id)
                .await
                .ok_or_else(|| ProtocolError::AnalysisNotFound { id: id.to_string() })?;
            let accepted = stored.select(&request.accepted_indices);
            (stored.original_text, stored.filename, accepted)
        }
        None => match request.original_text {
            Some(text) if !text.trim().is_empty() => (
                text,
                request.filename.unwrap_or_else(|| "protocol".to_string()),
                request.suggestions,
            ),
            _ => {
                return Err(ProtocolError::InvalidRequest {
                    message: "Either analysis_id or original_text is required".to_string(),
                })
            }
        },
    };

    let improved = state.generator.generate(&original_text, &accepted).await?;

    if improved.suggestions_applied == 0 {
        return Ok(Json(ImproveResponse {
            success: true,
            improved_protocol: improved.text,
            output_filename: None,
            suggestions_applied: 0,
            message: "No suggestions accepted, returning original protocol".to_string(),
        }));
    }

    let output_filename = output_file_name(&filename);
    state
        .outputs
        .write_file(&output_filename, improved.text.as_bytes())
        .await?;
    info!(
        "💾 Saved improved protocol {} ({} suggestions applied)",
        output_filename, improved.suggestions_applied
    );

    Ok(Json(ImproveResponse {
        success: true,
        message: format!(
            "Protocol improved with {} suggestions",
            improved.suggestions_applied
        ),
        improved_protocol: improved.text,
        output_filename: Some(output_filename),
        suggestions_applied: improved.suggestions_applied,
    }))
}

pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    if !is_plain_file_name(&filename) {
        return Err(ProtocolError::InvalidRequest {
            message: format!("Invalid file name: {}", filename),
        });
    }

    let data = state.outputs.read_file(&filename).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    ))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    // 以輸出資料夾中的檔案數計算，重新啟動後仍然正確
    let total_improved = state.outputs.list_files().await?.len();

    Ok(Json(StatsResponse {
        total_analyses: state.store.total_analyses(),
        total_improved,
        cache_size: state.store.len().await,
    }))
}

/// Reads the `file` field of a multipart upload and checks name and size.
async fn read_upload(
    state: &AppState,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<UploadedDocument> {
    let mut multipart = multipart.map_err(|e| ProtocolError::InvalidRequest {
        message: e.body_text(),
    })?;
    let limit = state.settings.max_file_size_bytes();

    let mut document = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("").trim().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        document = Some(UploadedDocument::new(filename, content_type, bytes.to_vec()));
    }

    let document = document.ok_or_else(|| ProtocolError::InvalidRequest {
        message: "No file provided".to_string(),
    })?;

    if document.filename.is_empty() {
        return Err(ProtocolError::InvalidRequest {
            message: "No file selected".to_string(),
        });
    }

    if !state.settings.is_extension_allowed(&document.filename) {
        let extension = std::path::Path::new(&document.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_else(|| "unknown".to_string());
        return Err(ProtocolError::UnsupportedFormat { format: extension });
    }

    extract::ensure_within_limit(document.size(), limit)?;
    Ok(document)
}

fn multipart_error(error: MultipartError, limit: usize) -> ProtocolError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        // 超過請求本文上限，實際大小未知
        ProtocolError::UploadTooLarge { limit }
    } else {
        ProtocolError::InvalidRequest {
            message: error.body_text(),
        }
    }
}

/// `improved_{stem}_{YYYYmmdd_HHMMSS}_{short id}.txt`
fn output_file_name(filename: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "improved_{}_{}_{}.txt",
        safe_stem(filename),
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        &id[..8]
    )
}
