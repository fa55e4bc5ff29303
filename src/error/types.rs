//! Error types
//!
//! Defines domain-specific error types for the storage engine and the API layer.

use std::fmt;
use std::io;

/// Storage engine errors
#[derive(Debug)]
pub enum StorageError {
    AccessDenied(String),
    NotFound(String),
    AlreadyExists(String),
    NotADirectory(String),
    NotAFile(String),
    InvalidName(String),
    FileTooLarge { limit: u64 },
    IoError(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::AccessDenied(p) => write!(f, "Access denied: {}", p),
            StorageError::NotFound(p) => write!(f, "Not found: {}", p),
            StorageError::AlreadyExists(p) => write!(f, "Already exists: {}", p),
            StorageError::NotADirectory(p) => write!(f, "Not a directory: {}", p),
            StorageError::NotAFile(p) => write!(f, "Not a file: {}", p),
            StorageError::InvalidName(n) => write!(f, "Invalid name: {}", n),
            StorageError::FileTooLarge { limit } => {
                write!(f, "File exceeds the upload limit of {} bytes", limit)
            }
            StorageError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        StorageError::IoError(error)
    }
}

impl StorageError {
    /// Classifies an I/O failure against `subject`, keeping `NotFound` distinct
    /// from generic failures.
    pub fn from_io(error: io::Error, subject: &str) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(subject.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(subject.to_string()),
            io::ErrorKind::NotADirectory => StorageError::NotADirectory(subject.to_string()),
            _ => StorageError::IoError(error),
        }
    }
}

/// Errors surfaced by the HTTP layer
#[derive(Debug)]
pub enum ApiError {
    Storage(StorageError),
    BadRequest(String),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Storage(e) => write!(f, "{}", e),
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        ApiError::Storage(error)
    }
}

impl From<io::Error> for ApiError {
    fn from(error: io::Error) -> Self {
        ApiError::Storage(StorageError::IoError(error))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("background task failed: {}", error))
    }
}

/// Startup failures of the server as a whole
#[derive(Debug)]
pub enum ServerError {
    Config(config::ConfigError),
    Storage(StorageError),
    IoError(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(e) => write!(f, "Configuration error: {}", e),
            ServerError::Storage(e) => write!(f, "Storage error: {}", e),
            ServerError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<config::ConfigError> for ServerError {
    fn from(error: config::ConfigError) -> Self {
        ServerError::Config(error)
    }
}

impl From<StorageError> for ServerError {
    fn from(error: StorageError) -> Self {
        ServerError::Storage(error)
    }
}

impl From<io::Error> for ServerError {
    fn from(error: io::Error) -> Self {
        ServerError::IoError(error)
    }
}
