//! HTTP mapping for [`ProtocolError`].

use crate::utils::error::ProtocolError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub detail: String,
    pub status: u16,
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                "❌ Request failed: {} (Category: {:?}, Severity: {:?})",
                self,
                self.category(),
                self.severity()
            );
        } else {
            tracing::warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        let retry_after = match &self {
            ProtocolError::RateLimited {
                retry_after: Some(wait),
            } => HeaderValue::from_str(&wait.as_secs().to_string()).ok(),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.kind(),
            detail: self.user_friendly_message(),
            status: status.as_u16(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ProtocolError::AnalysisNotFound {
            id: "abc".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "analysis_not_found");
        assert_eq!(json["status"], 404);
        assert_eq!(json["detail"], "Analysis not found: abc");
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ProtocolError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }

    #[test]
    fn test_upstream_failures_are_bad_gateway() {
        let response = ProtocolError::Authentication {
            message: "invalid x-api-key".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
