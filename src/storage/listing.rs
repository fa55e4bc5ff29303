//! Directory listing
//!
//! Enumerates the immediate children of a directory, hiding the storage
//! engine's own bookkeeping entries.

use log::{debug, error, info};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::StorageError;
use crate::storage::results::FileEntry;
use crate::storage::sandbox::{Sandbox, TRASH_DIR_NAME};
use crate::storage::trash::is_trash_record;

/// Lists the children of `dir` in directory-read order.
///
/// Children that vanish or cannot be stat'ed mid-read are omitted. The trash
/// directory is hidden when listing the storage root.
pub fn list_directory(sandbox: &Sandbox, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
    let display = sandbox.relative(dir);

    let metadata = fs::metadata(dir).map_err(|e| {
        debug!("Cannot stat {}: {}", dir.display(), e);
        StorageError::NotFound(display.clone())
    })?;
    if !metadata.is_dir() {
        return Err(StorageError::NotADirectory(display));
    }

    let hide_trash = dir == sandbox.root();
    let entries = read_children(dir, |entry| !(hide_trash && entry.name == TRASH_DIR_NAME))
    .map_err(|e| {
        error!("Failed to list directory {}: {}", dir.display(), e);
        StorageError::NotFound(display.clone())
    })?;

    info!("Listed directory /{} - {} entries", display, entries.len());
    Ok(entries)
}

/// Lists the trash contents without their record sidecars.
///
/// A missing trash directory lists as empty.
pub fn list_trash(sandbox: &Sandbox) -> Result<Vec<FileEntry>, StorageError> {
    let trash_root = sandbox.trash_root();
    match read_children(trash_root, |entry| !is_trash_record(trash_root, entry)) {
        Ok(entries) => {
            info!("Listed trash - {} entries", entries.len());
            Ok(entries)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => {
            error!("Failed to list trash: {}", e);
            Err(StorageError::IoError(e))
        }
    }
}

/// Reads `dir`, stat'ing each child that `keep` accepts.
fn read_children<F>(dir: &Path, mut keep: F) -> io::Result<Vec<FileEntry>>
where
    F: FnMut(&FileEntry) -> bool,
{
    let mut entries = Vec::new();

    for child in fs::read_dir(dir)? {
        let child = child?;
        let name = child.file_name().to_string_lossy().into_owned();

        // Follows symlinks like a plain stat; dangling links drop out here.
        let metadata = match fs::metadata(child.path()) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {}: {}", child.path().display(), e);
                continue;
            }
        };

        let entry = FileEntry::from_metadata(name, &metadata);
        if keep(&entry) {
            entries.push(entry);
        }
    }

    Ok(entries)
}
