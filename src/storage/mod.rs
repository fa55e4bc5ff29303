//! File system storage engine
//!
//! Sandboxed path resolution, listings, the trash lifecycle and upload/rename
//! operations over one storage root.

pub mod listing;
pub mod locks;
pub mod naming;
pub mod operations;
pub mod results;
pub mod sandbox;
pub mod scanner;
pub mod trash;

// Re-export commonly used types
pub use operations::{Storage, UploadTarget};
pub use results::{ArchiveTicket, DownloadTicket, EntryKind, FileEntry, RestoreOutcome};
pub use sandbox::{Sandbox, TRASH_DIR_NAME};
pub use scanner::DEFAULT_RECENT_LIMIT;
pub use trash::{DeleteOutcome, TrashRecord};
