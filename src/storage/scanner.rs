//! Recent files scan
//!
//! Depth-first walk of the whole storage tree, newest files first.

use log::{debug, info};
use walkdir::WalkDir;

use crate::storage::results::FileEntry;
use crate::storage::sandbox::Sandbox;

/// Default number of entries returned by the recent-files scan.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Collects every plain file outside the trash, sorts newest first and keeps `limit`.
///
/// Unreadable files and subtrees are skipped. Symlinks are not followed. The sort
/// is stable, so equal timestamps keep their traversal order.
pub fn recent_files(sandbox: &Sandbox, limit: usize) -> Vec<FileEntry> {
    let trash_root = sandbox.trash_root();

    let walker = WalkDir::new(sandbox.root())
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.path() != trash_root);

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Recent scan skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Recent scan skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let mut file = FileEntry::from_metadata(
            entry.file_name().to_string_lossy().into_owned(),
            &metadata,
        );
        file.path = Some(sandbox.relative(entry.path()));
        files.push(file);
    }

    let scanned = files.len();
    files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    files.truncate(limit);

    info!("Recent scan: {} files seen, returning {}", scanned, files.len());
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_aged(path: &Path, seconds_ago: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(seconds_ago))
            .unwrap();
    }

    #[test]
    fn newest_first_across_subdirectories() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::open(dir.path()).unwrap();
        write_aged(&sandbox.root().join("old.txt"), 300);
        write_aged(&sandbox.root().join("a/b/newest.txt"), 10);
        write_aged(&sandbox.root().join("a/middle.txt"), 100);

        let recent = recent_files(&sandbox, DEFAULT_RECENT_LIMIT);
        let names: Vec<_> = recent.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["newest.txt", "middle.txt", "old.txt"]);
        assert_eq!(recent[0].path.as_deref(), Some("a/b/newest.txt"));
    }

    #[test]
    fn trash_contents_are_never_reported() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::open(dir.path()).unwrap();
        write_aged(&sandbox.trash_root().join("deleted.txt"), 1);
        write_aged(&sandbox.trash_root().join("folder/inner.txt"), 1);
        write_aged(&sandbox.root().join("live.txt"), 50);

        let recent = recent_files(&sandbox, DEFAULT_RECENT_LIMIT);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "live.txt");
    }

    #[test]
    fn truncates_after_sorting() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::open(dir.path()).unwrap();
        for i in 0..30u64 {
            write_aged(&sandbox.root().join(format!("f{i:02}.txt")), 1000 - i * 10);
        }

        let recent = recent_files(&sandbox, DEFAULT_RECENT_LIMIT);
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].name, "f29.txt");
        assert_eq!(recent[19].name, "f10.txt");
        assert!(
            recent
                .windows(2)
                .all(|pair| pair[0].modified_at > pair[1].modified_at)
        );
    }

    #[test]
    fn directories_are_not_entries() {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::open(dir.path()).unwrap();
        fs::create_dir_all(sandbox.root().join("empty/nested")).unwrap();

        assert!(recent_files(&sandbox, DEFAULT_RECENT_LIMIT).is_empty());
    }
}
