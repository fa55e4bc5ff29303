//! Transfer module
//!
//! Moves bytes between the storage root and HTTP bodies: single-file
//! downloads, streamed uploads and on-the-fly zip archives.

pub mod archive;
pub mod file_ops;

// Re-export key types and functions
pub use archive::{ArchiveSettings, ArchiveSummary, stream_archive, write_archive};
pub use file_ops::{open_download, receive_upload};
