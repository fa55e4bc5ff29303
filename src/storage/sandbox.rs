//! Path sandbox
//!
//! Maps untrusted client paths onto the storage root. Every other storage
//! component only ever receives paths produced by [`Sandbox::resolve`].

use log::{info, warn};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// Name of the reserved trash directory directly under the storage root.
pub const TRASH_DIR_NAME: &str = ".trash";

/// The storage root and its reserved trash subtree, both canonical.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    trash_root: PathBuf,
}

impl Sandbox {
    /// Creates the root and trash directories if absent and canonicalizes them.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        let trash_root = root.join(TRASH_DIR_NAME);
        fs::create_dir_all(&trash_root)?;

        info!("Storage root: {}", root.display());
        Ok(Self { root, trash_root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trash_root(&self) -> &Path {
        &self.trash_root
    }

    /// Resolves a client-relative path to a canonical absolute path inside the root.
    ///
    /// `.` and `..` segments are collapsed lexically first. A path that starts with a
    /// separator is clamped at the root the way an absolute path is clamped at `/`;
    /// a relative path that climbs above the root is rejected. The existing part of
    /// the joined path is then canonicalized so symlinks cannot lead outside.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, StorageError> {
        let relative = normalize(user_path)
            .ok_or_else(|| StorageError::AccessDenied(user_path.to_string()))?;
        self.resolve_normalized(&relative, user_path)
    }

    /// Resolves the entry named by `user_path` itself: the parent directory is
    /// canonicalized like [`Sandbox::resolve`], but a symlink in the last
    /// component is kept as the link rather than followed.
    pub fn resolve_entry(&self, user_path: &str) -> Result<PathBuf, StorageError> {
        let relative = normalize(user_path)
            .ok_or_else(|| StorageError::AccessDenied(user_path.to_string()))?;

        match (relative.parent(), relative.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = self.resolve_normalized(parent, user_path)?;
                Ok(parent.join(name))
            }
            _ => Ok(self.root.clone()),
        }
    }

    fn resolve_normalized(&self, relative: &Path, user_path: &str) -> Result<PathBuf, StorageError> {
        let joined = self.root.join(relative);

        // Only escapes are access violations; a path through a file is NotADirectory.
        let canonical = canonicalize_lenient(&joined).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput => {
                warn!("Rejected path {:?}: {}", user_path, e);
                StorageError::AccessDenied(user_path.to_string())
            }
            _ => StorageError::from_io(e, user_path),
        })?;

        // Component-wise, so `/srv/root-evil` is not inside `/srv/root`.
        if !canonical.starts_with(&self.root) {
            warn!(
                "Path traversal attempt: {:?} resolved to {}",
                user_path,
                canonical.display()
            );
            return Err(StorageError::AccessDenied(user_path.to_string()));
        }

        Ok(canonical)
    }

    /// Resolves `name` inside the client-relative directory `parent`.
    pub fn resolve_child(&self, parent: &str, name: &str) -> Result<PathBuf, StorageError> {
        self.resolve(&format!("{}/{}", parent, name))
    }

    /// True for the trash root and everything below it.
    pub fn is_in_trash(&self, path: &Path) -> bool {
        path.starts_with(&self.trash_root)
    }

    /// Rejects the storage root and the trash root as operation targets.
    pub fn ensure_not_reserved(&self, path: &Path) -> Result<(), StorageError> {
        if path == self.root || path == self.trash_root {
            return Err(StorageError::AccessDenied(self.relative(path)));
        }
        Ok(())
    }

    /// Path relative to the root with `/` separators; empty for the root itself.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }
}

/// Collapses `.`/`..` and strips leading separators. Returns `None` when a
/// relative path climbs above its start, or on an embedded NUL.
fn normalize(user_path: &str) -> Option<PathBuf> {
    if user_path.contains('\0') {
        return None;
    }

    let anchored = user_path.starts_with(['/', '\\']);
    let mut segments: Vec<&str> = Vec::new();

    for segment in user_path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() && !anchored {
                    return None;
                }
            }
            other => segments.push(other),
        }
    }

    let mut relative = PathBuf::new();
    for segment in segments {
        // A segment such as `C:` must not turn the join absolute.
        match Path::new(segment).components().next() {
            Some(Component::Normal(_)) => relative.push(segment),
            _ => return None,
        }
    }
    Some(relative)
}

/// Canonicalizes the longest existing ancestor of `path` and re-appends the rest.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(mut canonical) => {
                for name in missing.iter().rev() {
                    canonical.push(name);
                }
                return Ok(canonical);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if existing.symlink_metadata().is_ok() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "dangling symlink in path",
                    ));
                }
                match existing.file_name() {
                    Some(name) => missing.push(name.to_os_string()),
                    None => return Err(e),
                }
                if !existing.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
