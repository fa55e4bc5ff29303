//! Trash lifecycle
//!
//! Soft delete moves an entry into the trash directory and records where it
//! came from in a `<name>.meta` sidecar. Restore reverses the move; deleting
//! something already in the trash removes it for good.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::storage::locks::PathLocks;
use crate::storage::naming::{resolve_unique_name, unique_name_by, validate_entry_name};
use crate::storage::results::{EntryKind, FileEntry, RestoreOutcome};
use crate::storage::sandbox::Sandbox;

/// Suffix of the provenance sidecar written next to each trashed entry.
pub const RECORD_SUFFIX: &str = ".meta";

/// Provenance of a trashed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashRecord {
    /// Pre-delete location, relative to the storage root
    pub original_path: String,
}

/// What a delete did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Moved into the trash under this name
    Trashed { trashed_name: String },
    /// Removed permanently from the trash
    Purged,
}

/// True for the sidecar of an entry present in the trash.
///
/// A trashed user file that merely ends in `.meta` is content, not a record.
pub fn is_trash_record(trash_root: &Path, entry: &FileEntry) -> bool {
    entry.kind == EntryKind::File && is_record_name(trash_root, &entry.name)
}

fn is_record_name(trash_root: &Path, name: &str) -> bool {
    match name.strip_suffix(RECORD_SUFFIX) {
        Some(owner) if !owner.is_empty() => trash_root.join(owner).symlink_metadata().is_ok(),
        _ => false,
    }
}

/// A trash name is free only if neither it nor its sidecar exists, and it
/// cannot be mistaken for the sidecar of something already trashed.
fn free_trash_name(trash_root: &Path, desired: &str) -> String {
    unique_name_by(desired, |candidate| {
        trash_root.join(candidate).symlink_metadata().is_ok()
            || trash_root
                .join(format!("{candidate}{RECORD_SUFFIX}"))
                .symlink_metadata()
                .is_ok()
            || is_record_name(trash_root, candidate)
    })
}

fn record_path(trashed: &Path) -> PathBuf {
    let mut name = trashed
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(RECORD_SUFFIX);
    trashed.with_file_name(name)
}

/// Deletes a resolved path: soft delete for live entries, purge inside the trash.
///
/// The caller holds the lock on `path`.
pub fn delete_entry(
    sandbox: &Sandbox,
    locks: &PathLocks,
    path: &Path,
) -> Result<DeleteOutcome, StorageError> {
    sandbox.ensure_not_reserved(path)?;

    if sandbox.is_in_trash(path) {
        purge(sandbox, path)?;
        Ok(DeleteOutcome::Purged)
    } else {
        let trashed_name = move_to_trash(sandbox, locks, path)?;
        Ok(DeleteOutcome::Trashed { trashed_name })
    }
}

fn purge(sandbox: &Sandbox, path: &Path) -> Result<(), StorageError> {
    let display = sandbox.relative(path);
    let top_level = path.parent() == Some(sandbox.trash_root());

    // Records go with their entry, never on their own.
    if top_level {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if is_record_name(sandbox.trash_root(), name) {
                return Err(StorageError::AccessDenied(display));
            }
        }
    }
    let metadata = path
        .symlink_metadata()
        .map_err(|e| StorageError::from_io(e, &display))?;

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| StorageError::from_io(e, &display))?;

    // Only top-level trash entries carry a record.
    if top_level {
        remove_record(path);
    }

    info!("Permanently deleted /{}", display);
    Ok(())
}

/// Moves a live entry into the trash and returns its name there.
///
/// The record is written after the move; if that write fails the delete still
/// stands and a later restore falls back to the top level. The trash lock is
/// held from picking the name until the record is written.
fn move_to_trash(
    sandbox: &Sandbox,
    locks: &PathLocks,
    path: &Path,
) -> Result<String, StorageError> {
    let original_path = sandbox.relative(path);
    path.symlink_metadata()
        .map_err(|e| StorageError::from_io(e, &original_path))?;

    let desired = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StorageError::AccessDenied(original_path.clone()))?;

    let trash_root = sandbox.trash_root();
    let lock = locks.handle(trash_root);
    let _guard = lock.lock();
    fs::create_dir_all(trash_root)?;

    let trashed_name = free_trash_name(trash_root, &desired);
    let trashed_path = trash_root.join(&trashed_name);

    fs::rename(path, &trashed_path).map_err(|e| StorageError::from_io(e, &original_path))?;

    let record = TrashRecord {
        original_path: original_path.clone(),
    };
    if let Err(e) = write_record(&trashed_path, &record) {
        warn!(
            "Moved /{} to trash as {} but could not write its record: {}",
            original_path, trashed_name, e
        );
    }

    info!("Moved /{} to trash as {}", original_path, trashed_name);
    Ok(trashed_name)
}

fn write_record(trashed: &Path, record: &TrashRecord) -> io::Result<()> {
    let json = serde_json::to_vec(record).map_err(io::Error::other)?;
    fs::write(record_path(trashed), json)
}

fn read_record(trashed: &Path) -> Option<TrashRecord> {
    let path = record_path(trashed);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("No readable record at {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Corrupt trash record {}: {}", path.display(), e);
            None
        }
    }
}

fn remove_record(trashed: &Path) {
    let path = record_path(trashed);
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove trash record {}: {}", path.display(), e);
        }
    }
}

/// Where a record says the entry belongs, if that is still a valid live location.
fn recorded_destination(sandbox: &Sandbox, record: &TrashRecord) -> Option<PathBuf> {
    match sandbox.resolve_entry(&record.original_path) {
        Ok(path) if path != sandbox.root() && !sandbox.is_in_trash(&path) => Some(path),
        Ok(_) => None,
        Err(e) => {
            warn!(
                "Ignoring trash record pointing at {:?}: {}",
                record.original_path, e
            );
            None
        }
    }
}

/// Restores a trashed entry by its trash-side name and returns its new location.
///
/// The caller holds the lock on the trashed entry; the destination directory
/// is locked here while a free name is picked and claimed.
pub fn restore_entry(
    sandbox: &Sandbox,
    locks: &PathLocks,
    trashed_name: &str,
) -> Result<PathBuf, StorageError> {
    let name = validate_entry_name(trashed_name)?;
    if is_record_name(sandbox.trash_root(), name) {
        return Err(StorageError::InvalidName(format!(
            "{name} is a trash record, not a trashed entry"
        )));
    }
    let source = sandbox.trash_root().join(name);

    source
        .symlink_metadata()
        .map_err(|e| StorageError::from_io(e, name))?;

    let destination = match read_record(&source)
        .and_then(|record| recorded_destination(sandbox, &record))
    {
        Some(destination) => destination,
        None => {
            warn!("Restoring {} to the top level without provenance", name);
            sandbox.root().join(name)
        }
    };

    let target_dir = destination.parent().unwrap_or(sandbox.root());
    let lock = locks.handle(target_dir);
    let _guard = lock.lock();
    fs::create_dir_all(target_dir)?;

    let desired = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let final_path = target_dir.join(resolve_unique_name(target_dir, &desired));

    fs::rename(&source, &final_path).map_err(|e| StorageError::from_io(e, name))?;
    remove_record(&source);

    info!(
        "Restored {} from trash to /{}",
        name,
        sandbox.relative(&final_path)
    );
    Ok(final_path)
}

/// Restores each name independently; one failure never stops the batch.
pub fn restore_entries<F>(names: &[String], mut restore: F) -> Vec<RestoreOutcome>
where
    F: FnMut(&str) -> Result<String, StorageError>,
{
    names
        .iter()
        .map(|name| match restore(name) {
            Ok(restored_to) => RestoreOutcome {
                name: name.clone(),
                restored_to: Some(restored_to),
                error: None,
            },
            Err(e) => {
                warn!("Failed to restore {}: {}", name, e);
                RestoreOutcome {
                    name: name.clone(),
                    restored_to: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}
