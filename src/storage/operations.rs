//! Storage operations
//!
//! The storage engine's public surface. Every method takes client-relative
//! paths, runs them through the sandbox and then hands the validated absolute
//! path to listing, scanning, trash or archive code.

use chrono::Local;
use log::{error, info};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::storage::listing::{list_directory, list_trash};
use crate::storage::locks::PathLocks;
use crate::storage::naming::{base_name, repair_filename, resolve_unique_name, validate_entry_name};
use crate::storage::results::{ArchiveTicket, DownloadTicket, FileEntry, RestoreOutcome};
use crate::storage::sandbox::{Sandbox, TRASH_DIR_NAME};
use crate::storage::scanner::recent_files;
use crate::storage::trash::{DeleteOutcome, delete_entry, restore_entries, restore_entry};

/// Attempts at claiming a free upload name before giving up.
const MAX_UPLOAD_NAME_ATTEMPTS: usize = 16;

/// A freshly created upload target
pub struct UploadTarget {
    pub file: File,
    pub file_path: PathBuf,
    pub stored_name: String,
}

/// Sandboxed file storage rooted at one directory
pub struct Storage {
    sandbox: Sandbox,
    locks: PathLocks,
}

impl Storage {
    /// Opens the storage root, creating it and its trash directory if absent.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            sandbox: Sandbox::open(root)?,
            locks: PathLocks::new(),
        })
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    /// Lists a directory; an empty path lists the root.
    pub fn list(&self, user_path: &str) -> Result<Vec<FileEntry>, StorageError> {
        let dir = self.sandbox.resolve(user_path)?;
        list_directory(&self.sandbox, &dir)
    }

    /// The `limit` most recently modified files outside the trash.
    pub fn recent(&self, limit: usize) -> Vec<FileEntry> {
        recent_files(&self.sandbox, limit)
    }

    pub fn list_trash(&self) -> Result<Vec<FileEntry>, StorageError> {
        list_trash(&self.sandbox)
    }

    /// Validates a file for download.
    pub fn prepare_download(&self, user_path: &str) -> Result<DownloadTicket, StorageError> {
        let file_path = self.sandbox.resolve(user_path)?;
        let display = self.sandbox.relative(&file_path);

        let metadata =
            fs::metadata(&file_path).map_err(|e| StorageError::from_io(e, &display))?;
        if !metadata.is_file() {
            return Err(StorageError::NotAFile(display));
        }

        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!("Prepared download of /{} ({} bytes)", display, metadata.len());
        Ok(DownloadTicket {
            file_path,
            file_name,
            size: metadata.len(),
        })
    }

    /// Validates every path of an archive request; a single sandbox violation
    /// rejects the whole request. Missing paths are left for the archiver to skip.
    pub fn prepare_archive(&self, user_paths: &[String]) -> Result<ArchiveTicket, StorageError> {
        let sources = user_paths
            .iter()
            .map(|p| self.sandbox.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;

        let archive_name = match sources.as_slice() {
            [single] if single != self.sandbox.root() => format!(
                "{}.zip",
                single
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
            _ => format!("archive-{}.zip", Local::now().format("%Y%m%d-%H%M%S")),
        };

        Ok(ArchiveTicket {
            sources,
            archive_name,
        })
    }

    /// Creates `name` inside the directory `parent`.
    pub fn create_directory(&self, parent: &str, name: &str) -> Result<(), StorageError> {
        let name = validate_entry_name(name)?;
        let path = self.sandbox.resolve_child(parent, name)?;
        self.sandbox.ensure_not_reserved(&path)?;
        let display = self.sandbox.relative(&path);
        if self.sandbox.is_in_trash(&path) {
            return Err(StorageError::AccessDenied(display));
        }

        // Locks the parent so a rename cannot claim the same name meanwhile.
        let parent_dir = path.parent().unwrap_or(self.sandbox.root());
        let lock = self.locks.handle(parent_dir);
        let _guard = lock.lock();

        fs::create_dir(&path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(display.clone()),
            io::ErrorKind::NotFound => StorageError::NotFound(parent.to_string()),
            _ => {
                error!("Failed to create directory /{}: {}", display, e);
                StorageError::IoError(e)
            }
        })?;

        info!("Created directory /{}", display);
        Ok(())
    }

    /// Soft delete, or permanent delete when the path is already in the trash.
    ///
    /// A symlink is deleted as the link itself.
    pub fn delete(&self, user_path: &str) -> Result<DeleteOutcome, StorageError> {
        let path = self.sandbox.resolve_entry(user_path)?;

        let lock = self.locks.handle(&path);
        let _guard = lock.lock();
        delete_entry(&self.sandbox, &self.locks, &path)
    }

    /// Restores one trashed entry; returns its new path relative to the root.
    pub fn restore(&self, trashed_name: &str) -> Result<String, StorageError> {
        let name = validate_entry_name(trashed_name)?;
        let lock = self.locks.handle(&self.sandbox.trash_root().join(name));
        let _guard = lock.lock();

        let restored = restore_entry(&self.sandbox, &self.locks, name)?;
        Ok(self.sandbox.relative(&restored))
    }

    /// Best-effort batch restore with one outcome per name.
    pub fn restore_many(&self, trashed_names: &[String]) -> Vec<RestoreOutcome> {
        let outcomes = restore_entries(trashed_names, |name| self.restore(name));
        let restored = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            "Batch restore: {}/{} entries restored",
            restored,
            outcomes.len()
        );
        outcomes
    }

    /// Renames an entry within its directory; never overwrites.
    ///
    /// A symlink is renamed as the link itself.
    pub fn rename(&self, user_path: &str, new_name: &str) -> Result<String, StorageError> {
        let new_name = validate_entry_name(new_name)?;
        let source = self.sandbox.resolve_entry(user_path)?;
        self.sandbox.ensure_not_reserved(&source)?;
        if self.sandbox.is_in_trash(&source) {
            return Err(StorageError::AccessDenied(self.sandbox.relative(&source)));
        }

        let parent_dir = source.parent().unwrap_or(self.sandbox.root()).to_path_buf();
        let destination = parent_dir.join(new_name);
        self.sandbox.ensure_not_reserved(&destination)?;

        let source_display = self.sandbox.relative(&source);
        let destination_display = self.sandbox.relative(&destination);

        let source_lock = self.locks.handle(&source);
        let _source_guard = source_lock.lock();
        // Every operation that claims a name in this directory takes this lock.
        let dir_lock = self.locks.handle(&parent_dir);
        let _dir_guard = dir_lock.lock();

        source
            .symlink_metadata()
            .map_err(|e| StorageError::from_io(e, &source_display))?;
        if destination != source && destination.symlink_metadata().is_ok() {
            return Err(StorageError::AlreadyExists(destination_display));
        }

        fs::rename(&source, &destination)
            .map_err(|e| StorageError::from_io(e, &source_display))?;

        info!("Renamed /{} to /{}", source_display, destination_display);
        Ok(destination_display)
    }

    /// Claims a collision-free name in `target_dir` and creates the file.
    ///
    /// The client-supplied name is reduced to its last component and repaired
    /// if it arrived as Latin-1-decoded UTF-8.
    pub fn create_upload(
        &self,
        target_dir: &str,
        original_name: &str,
    ) -> Result<UploadTarget, StorageError> {
        let repaired = repair_filename(original_name);
        let desired = validate_entry_name(base_name(&repaired))?.to_string();

        let dir = self.sandbox.resolve(target_dir)?;
        let display = self.sandbox.relative(&dir);
        if self.sandbox.is_in_trash(&dir) {
            return Err(StorageError::AccessDenied(display));
        }
        if dir == self.sandbox.root() && desired == TRASH_DIR_NAME {
            return Err(StorageError::AccessDenied(desired));
        }

        let metadata = fs::metadata(&dir).map_err(|e| StorageError::from_io(e, &display))?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(display));
        }

        let lock = self.locks.handle(&dir);
        let _guard = lock.lock();

        for _ in 0..MAX_UPLOAD_NAME_ATTEMPTS {
            let stored_name = resolve_unique_name(&dir, &desired);
            let file_path = dir.join(&stored_name);

            // create_new closes the window between picking the name and creating it.
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&file_path)
            {
                Ok(file) => {
                    info!(
                        "Upload target /{} reserved",
                        self.sandbox.relative(&file_path)
                    );
                    return Ok(UploadTarget {
                        file,
                        file_path,
                        stored_name,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    error!("Failed to create upload {}: {}", file_path.display(), e);
                    return Err(StorageError::IoError(e));
                }
            }
        }

        Err(StorageError::AlreadyExists(desired))
    }
}
