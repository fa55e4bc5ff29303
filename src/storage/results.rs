//! Storage result types
//!
//! Defines result structures returned by storage operations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::Metadata;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Kind of a directory child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata snapshot of one directory child, recomputed on every listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Path relative to the storage root; only set by the recent-files scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl FileEntry {
    pub fn from_metadata(name: String, metadata: &Metadata) -> Self {
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));
        // Not every filesystem records birth time.
        let created_at = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified_at);

        Self {
            name,
            kind: if metadata.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size_bytes: metadata.len(),
            created_at,
            modified_at,
            path: None,
        }
    }
}

/// A validated file ready to be streamed to a client
#[derive(Debug, Clone)]
pub struct DownloadTicket {
    pub file_path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// A validated archive job: resolved sources and the suggested archive name
#[derive(Debug, Clone)]
pub struct ArchiveTicket {
    pub sources: Vec<PathBuf>,
    pub archive_name: String,
}

/// Outcome of restoring one trashed entry as part of a batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        self.restored_to.is_some()
    }
}
