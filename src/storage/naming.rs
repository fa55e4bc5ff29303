//! Entry naming
//!
//! Collision resolution shared by upload, move-to-trash, restore and archive
//! building, plus validation of single entry names.

use std::path::Path;

use crate::error::StorageError;

/// Splits `name` into stem and extension; the extension keeps its dot.
///
/// A leading dot does not start an extension, so `.bashrc` has no extension.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Returns `desired` if it is free, otherwise the first free `stem (n)ext` for n = 1, 2, ...
pub fn unique_name_by<F>(desired: &str, mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    if !is_taken(desired) {
        return desired.to_string();
    }

    let (stem, ext) = split_name(desired);
    let mut counter: u64 = 1;
    loop {
        let candidate = format!("{stem} ({counter}){ext}");
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Name under `target_dir` that does not collide with any existing entry.
///
/// Broken symlinks count as taken.
pub fn resolve_unique_name(target_dir: &Path, desired: &str) -> String {
    unique_name_by(desired, |candidate| {
        target_dir.join(candidate).symlink_metadata().is_ok()
    })
}

/// Accepts a single path component; rejects empty, `.`, `..`, separators and NUL.
pub fn validate_entry_name(name: &str) -> Result<&str, StorageError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

/// Final component of a client-supplied file name, with either separator style.
pub fn base_name(client_name: &str) -> &str {
    client_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(client_name)
}

/// Undoes UTF-8 bytes that were decoded as Latin-1 by the client stack.
///
/// Only applies when every char fits in one byte and the bytes form valid UTF-8;
/// anything else is returned unchanged.
pub fn repair_filename(name: &str) -> String {
    if name.is_ascii() || name.chars().any(|c| u32::from(c) > 0xFF) {
        return name.to_string();
    }

    let bytes: Vec<u8> = name.chars().map(|c| u32::from(c) as u8).collect();
    match String::from_utf8(bytes) {
        Ok(repaired) => repaired,
        Err(_) => name.to_string(),
    }
}
