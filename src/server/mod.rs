//! HTTP API: upload, analyze, improve and download protocols.

pub mod error;
mod handlers;

use crate::adapters::LocalStorage;
use crate::analysis::{AnthropicClient, ProtocolAnalyzer, ProtocolGenerator};
use crate::config::Settings;
use crate::domain::ports::ModelClient;
use crate::store::SuggestionStore;
use crate::utils::error::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Multipart framing overhead allowed on top of the configured file size.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub model: Arc<dyn ModelClient>,
    pub analyzer: Arc<ProtocolAnalyzer>,
    pub generator: Arc<ProtocolGenerator>,
    pub store: SuggestionStore,
    pub outputs: LocalStorage,
}

impl AppState {
    pub fn new(settings: Settings, model: Arc<dyn ModelClient>) -> Self {
        Self {
            analyzer: Arc::new(ProtocolAnalyzer::new(model.clone(), &settings)),
            generator: Arc::new(ProtocolGenerator::new(model.clone(), &settings)),
            store: SuggestionStore::from_settings(&settings),
            outputs: LocalStorage::new(settings.output_folder()),
            settings: Arc::new(settings),
            model,
        }
    }

    /// State backed by the hosted model API configured in `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let client = AnthropicClient::from_settings(&settings)?;
        Ok(Self::new(settings, Arc::new(client)))
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .settings
        .max_file_size_bytes()
        .saturating_add(MULTIPART_OVERHEAD);
    let cors = cors_layer(&state.settings);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/upload", post(handlers::upload))
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/improve", post(handlers::improve))
        .route("/api/generate", post(handlers::improve))
        .route("/api/download/:filename", get(handlers::download))
        .route("/api/stats", get(handlers::stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings.cors_allow_origins();
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn serve(settings: Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.host(), settings.port());
    tokio::fs::create_dir_all(settings.output_folder()).await?;

    let state = AppState::from_settings(settings)?;
    tracing::info!(
        "🤖 Using model {} (outputs in {})",
        state.model.model_name(),
        state.outputs.base_path().display()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::ScriptedModel;
    use crate::extract::fixtures::{docx_with_body, paragraph};
    use crate::utils::error::ProtocolError;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "protocol-test-boundary";

    const ANALYSIS_REPLY: &str = r#"{
        "summary": "Basic PCR protocol.",
        "overall_score": 5,
        "total_issues": 2,
        "suggestions": [
            {"category": "completeness", "priority": "MEDIUM", "location": "Step 2", "issue": "No cycle count", "suggestion": "Run 30 cycles"},
            {"category": "safety", "priority": "HIGH", "location": "Step 1", "issue": "No PPE", "suggestion": "Wear gloves"}
        ]
    }"#;

    fn test_state(model: ScriptedModel) -> (AppState, Arc<ScriptedModel>, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.upload.output_folder = Some(dir.path().display().to_string());
        settings.upload.max_file_size_mb = Some(1);

        let model = Arc::new(model);
        (AppState::new(settings, model.clone()), model, dir)
    }

    fn protocol_docx() -> Vec<u8> {
        let body = [
            paragraph("1. Combine template DNA with master mix."),
            paragraph("2. Run the thermocycler."),
        ]
        .concat();
        docx_with_body(&body, Some("PCR"))
    }

    fn multipart_request(uri: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_root_and_stats() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));

        let (status, json) = send(&state, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");

        let (status, json) = send(&state, get_request("/api/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_analyses"], 0);
        assert_eq!(json["total_improved"], 0);
        assert_eq!(json["cache_size"], 0);
    }

    #[tokio::test]
    async fn test_stats_count_files_already_in_output_folder() {
        let (_, _, dir) = test_state(ScriptedModel::new(vec![]));
        let existing = "improved_pcr_20260101_000000_abcdef12.txt";
        std::fs::write(dir.path().join(existing), "1. Mix").unwrap();

        // 重新啟動後的新狀態
        let mut settings = Settings::default();
        settings.upload.output_folder = Some(dir.path().display().to_string());
        let state = AppState::new(settings, Arc::new(ScriptedModel::new(vec![])));

        let (status, json) = send(&state, get_request("/api/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_improved"], 1);
        assert_eq!(json["total_analyses"], 0);
        assert_eq!(json["cache_size"], 0);

        let (status, _) = send(&state, get_request(&format!("/api/download/{}", existing))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_model_connectivity() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec!["OK"]));
        let (_, json) = send(&state, get_request("/health")).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["api_connection"], "ok");

        let (state, _, _dir) = test_state(ScriptedModel::failing(|| ProtocolError::Authentication {
            message: "bad key".to_string(),
        }));
        let (status, json) = send(&state, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["api_connection"], "failed");
    }

    #[tokio::test]
    async fn test_upload_extracts_text() {
        let (state, model, _dir) = test_state(ScriptedModel::new(vec![]));

        let (status, json) =
            send(&state, multipart_request("/api/upload", "pcr.docx", &protocol_docx())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["filename"], "pcr.docx");
        assert_eq!(json["metadata"]["file_type"], "docx");
        assert!(json["preview"].as_str().unwrap().starts_with("1. Combine template DNA"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_extension() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));

        let (status, json) =
            send(&state, multipart_request("/api/upload", "notes.txt", b"1. Mix")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "unsupported_format");
        assert_eq!(json["status"], 400);
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_file() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));
        let bytes = vec![b'%'; 1024 * 1024 + 10];

        let (status, json) = send(&state, multipart_request("/api/upload", "big.pdf", &bytes)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"], "file_too_large");
    }

    #[tokio::test]
    async fn test_body_over_request_limit_reports_configured_limit() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));
        let bytes = vec![b'%'; 1024 * 1024 + 100 * 1024];

        let (status, json) = send(&state, multipart_request("/api/upload", "big.pdf", &bytes)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"], "file_too_large");
        let detail = json["detail"].as_str().unwrap();
        assert!(detail.contains("maximum file size of 1048576 bytes"));
        assert!(!detail.contains("File too large:"));
    }

    #[tokio::test]
    async fn test_corrupt_upload_is_unprocessable() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));

        let (status, json) =
            send(&state, multipart_request("/api/analyze", "broken.pdf", b"not a pdf")).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "corrupt_file");
    }

    #[tokio::test]
    async fn test_analyze_improve_download_flow() {
        let (state, model, dir) = test_state(ScriptedModel::new(vec![
            ANALYSIS_REPLY,
            "1. Wearing gloves, combine template DNA with master mix.\n2. Run the thermocycler.",
        ]));

        let (status, analysis) =
            send(&state, multipart_request("/api/analyze", "pcr.docx", &protocol_docx())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(analysis["suggestions"][0]["priority"], "HIGH");
        assert_eq!(analysis["suggestions"][0]["category"], "safety");
        assert_eq!(analysis["metadata"]["model_used"], "scripted-model");
        let analysis_id = analysis["analysis_id"].as_str().unwrap().to_string();

        let (status, improved) = send(
            &state,
            json_request(
                "/api/improve",
                serde_json::json!({"analysis_id": analysis_id, "accepted_indices": [0, 0, 9]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(improved["suggestions_applied"], 1);
        assert!(model.prompts()[1].contains("- Step 1: Wear gloves"));
        assert!(!model.prompts()[1].contains("Run 30 cycles"));

        let output_filename = improved["output_filename"].as_str().unwrap().to_string();
        assert!(output_filename.starts_with("improved_pcr_"));
        assert!(dir.path().join(&output_filename).exists());

        let response = create_router(state.clone())
            .oneshot(get_request(&format!("/api/download/{}", output_filename)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains(&output_filename));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).starts_with("1. Wearing gloves"));

        let (_, stats) = send(&state, get_request("/api/stats")).await;
        assert_eq!(stats["total_analyses"], 1);
        assert_eq!(stats["total_improved"], 1);
        assert_eq!(stats["cache_size"], 1);
    }

    #[tokio::test]
    async fn test_improve_with_nothing_accepted_returns_original() {
        let (state, model, dir) = test_state(ScriptedModel::new(vec![ANALYSIS_REPLY]));

        let (_, analysis) =
            send(&state, multipart_request("/api/analyze", "pcr.docx", &protocol_docx())).await;
        let analysis_id = analysis["analysis_id"].as_str().unwrap();

        let (status, improved) = send(
            &state,
            json_request(
                "/api/generate",
                serde_json::json!({"analysis_id": analysis_id, "accepted_indices": [42]}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(improved["suggestions_applied"], 0);
        assert_eq!(
            improved["improved_protocol"],
            "1. Combine template DNA with master mix.\n2. Run the thermocycler."
        );
        assert!(improved["output_filename"].is_null());
        assert_eq!(
            improved["message"],
            "No suggestions accepted, returning original protocol"
        );
        assert_eq!(model.call_count(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_improve_with_inline_suggestions() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec!["1. Mix on ice."]));

        let (status, improved) = send(
            &state,
            json_request(
                "/api/improve",
                serde_json::json!({
                    "original_text": "1. Mix.",
                    "filename": "mix.pdf",
                    "suggestions": [{
                        "category": "clarity",
                        "priority": "LOW",
                        "location": "Step 1",
                        "issue": "No temperature",
                        "suggestion": "Mix on ice"
                    }]
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(improved["improved_protocol"], "1. Mix on ice.");
        assert!(improved["output_filename"]
            .as_str()
            .unwrap()
            .starts_with("improved_mix_"));
    }

    #[tokio::test]
    async fn test_improve_request_errors() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));

        let (status, json) = send(
            &state,
            json_request("/api/improve", serde_json::json!({"analysis_id": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "analysis_not_found");

        let (status, json) = send(&state, json_request("/api/improve", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_request");

        let request = Request::builder()
            .method("POST")
            .uri("/api/improve")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_download_rejects_traversal_and_missing_files() {
        let (state, _, _dir) = test_state(ScriptedModel::new(vec![]));

        let (status, _) = send(&state, get_request("/api/download/..%2F..%2Fetc%2Fpasswd")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(&state, get_request("/api/download/improved_missing.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "file_not_found");
    }

    #[tokio::test]
    async fn test_rate_limited_analysis() {
        let (state, _, _dir) = test_state(ScriptedModel::failing(|| ProtocolError::RateLimited {
            retry_after: Some(Duration::from_secs(12)),
        }));

        let response = create_router(state.clone())
            .oneshot(multipart_request("/api/analyze", "pcr.docx", &protocol_docx()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
        assert_eq!(state.store.total_analyses(), 0);
    }

    #[test]
    fn test_from_settings_requires_api_key() {
        assert!(matches!(
            AppState::from_settings(Settings::default()),
            Err(ProtocolError::MissingConfigError { .. })
        ));
    }
}
