//! Error handlers
//!
//! Maps errors onto stable HTTP status classes and logs them.

use axum::http::StatusCode;
use log::{error, warn};

use crate::error::types::{ApiError, StorageError};

/// Log an API error; generic failures get full detail.
pub fn handle_error(err: &ApiError) {
    match err {
        ApiError::Storage(StorageError::IoError(e)) => {
            error!("Storage I/O failure: {:?}", e);
        }
        ApiError::Internal(msg) => error!("Internal error: {}", msg),
        other => warn!("Request rejected: {}", other),
    }
}

/// Convert error to HTTP status code
pub fn error_to_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Storage(e) => match e {
            StorageError::AccessDenied(_) => StatusCode::FORBIDDEN,
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
            StorageError::NotADirectory(_) => StatusCode::BAD_REQUEST,
            StorageError::NotAFile(_) => StatusCode::BAD_REQUEST,
            StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
            StorageError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Stable machine-readable name of the error kind
pub fn error_kind(err: &ApiError) -> &'static str {
    match err {
        ApiError::Storage(e) => match e {
            StorageError::AccessDenied(_) => "access_denied",
            StorageError::NotFound(_) => "not_found",
            StorageError::AlreadyExists(_) => "already_exists",
            StorageError::NotADirectory(_) => "not_a_directory",
            StorageError::NotAFile(_) => "not_a_file",
            StorageError::InvalidName(_) => "invalid_name",
            StorageError::FileTooLarge { .. } => "file_too_large",
            StorageError::IoError(_) => "io_error",
        },
        ApiError::BadRequest(_) => "bad_request",
        ApiError::Internal(_) => "internal",
    }
}
