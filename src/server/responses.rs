//! HTTP responses
//!
//! JSON bodies for successful operations and the error envelope.

use axum::Json;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{ApiError, error_kind, error_to_status, handle_error};
use crate::storage::{DeleteOutcome, RestoreOutcome};

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        handle_error(&self);
        let status = error_to_status(&self);
        let body = ErrorBody {
            error: error_kind(&self),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result of a delete request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub permanent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed_name: Option<String>,
}

impl From<DeleteOutcome> for DeleteResponse {
    fn from(outcome: DeleteOutcome) -> Self {
        match outcome {
            DeleteOutcome::Trashed { trashed_name } => Self {
                permanent: false,
                trashed_name: Some(trashed_name),
            },
            DeleteOutcome::Purged => Self {
                permanent: true,
                trashed_name: None,
            },
        }
    }
}

/// Result of a single restore, rename or upload: where the entry now lives
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResponse {
    pub path: String,
}

/// Result of a batch restore
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreManyResponse {
    pub restored: usize,
    pub failed: usize,
    pub results: Vec<RestoreOutcome>,
}

impl From<Vec<RestoreOutcome>> for RestoreManyResponse {
    fn from(results: Vec<RestoreOutcome>) -> Self {
        let restored = results.iter().filter(|r| r.is_success()).count();
        Self {
            restored,
            failed: results.len() - restored,
            results,
        }
    }
}

/// `Content-Disposition` for a download, RFC 5987 encoded
pub fn attachment_header(file_name: &str) -> HeaderValue {
    let encoded = urlencoding::encode(file_name);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{encoded}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_header_encodes_non_ascii() {
        let header = attachment_header("résumé final.pdf");
        let value = header.to_str().unwrap();
        assert!(value.starts_with("attachment;"));
        assert!(value.contains("filename*=UTF-8''r%C3%A9sum%C3%A9%20final.pdf"));
    }

    #[test]
    fn restore_summary_counts_outcomes() {
        let response = RestoreManyResponse::from(vec![
            RestoreOutcome {
                name: "a".into(),
                restored_to: Some("a".into()),
                error: None,
            },
            RestoreOutcome {
                name: "b".into(),
                restored_to: None,
                error: Some("Not found: b".into()),
            },
        ]);
        assert_eq!(response.restored, 1);
        assert_eq!(response.failed, 1);
    }
}
