//! Part file naming.
//!
//! A stream `name` in directory `dir` is stored as a sequence of parts
//! `dir/name.000.log`, `dir/name.001.log`, ... The current part is the highest
//! part number found on disk; nothing else records it.
//!
//! A rooted `name` ignores `dir`: the part suffix is appended to the name
//! itself and the name's parent directory is scanned. A relative name with
//! directory components is scanned in that subdirectory of `dir`.

use std::path::{Path, PathBuf};

use crate::error::{LogError, LogResult};
use crate::storage::Storage;

/// File extension of every part.
pub const PART_EXTENSION: &str = "log";

/// Minimum rendered width of a part number.
const PART_WIDTH: usize = 3;

/// Splits a stream name into the directory holding its parts and the base
/// file name. A name with directory components (`sub/out`) keeps its parts
/// in that subdirectory of `dir`.
fn locate<'a>(name: &'a str, dir: &Path) -> LogResult<(PathBuf, &'a str)> {
    let path = Path::new(name);
    let base = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LogError::config(format!("stream name '{name}' has no file name")))?;

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok((dir.join(parent), base)),
        _ => Ok((dir.to_path_buf(), base)),
    }
}

/// Returns the path of part `part` of stream `name`.
///
/// Part numbers below 1000 are zero-padded to three digits; larger numbers
/// keep their natural width.
#[must_use]
pub fn part_path(name: &str, dir: &Path, part: u32) -> PathBuf {
    let file = format!("{name}.{part:03}.{PART_EXTENSION}");
    if Path::new(name).has_root() {
        PathBuf::from(file)
    } else {
        dir.join(file)
    }
}

/// Parses the part number out of `file_name` if it is a part of `base`.
///
/// Accepts `base.<digits>.log` where the digits number at least three.
#[must_use]
pub fn parse_part(file_name: &str, base: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix(base)?
        .strip_prefix('.')?
        .strip_suffix(PART_EXTENSION)?
        .strip_suffix('.')?;

    if digits.len() < PART_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Returns the highest existing part of stream `name`, or 0 if there is none.
///
/// Creates the directory holding the parts if it is missing.
///
/// # Errors
/// Returns an error if the directory cannot be created or listed.
pub fn current_part(storage: &dyn Storage, name: &str, dir: &Path) -> LogResult<u32> {
    let (scan_dir, base) = locate(name, dir)?;
    if !storage.exists(&scan_dir)? {
        storage.create_dir_all(&scan_dir)?;
    }

    let part = storage
        .list_files(&scan_dir)?
        .iter()
        .filter_map(|p| p.file_name()?.to_str())
        .filter_map(|file_name| parse_part(file_name, base))
        .max()
        .unwrap_or(0);
    Ok(part)
}

/// Returns the path of the current part of stream `name`.
///
/// # Errors
/// Returns an error if the directory scan fails.
pub fn current_path(storage: &dyn Storage, name: &str, dir: &Path) -> LogResult<PathBuf> {
    let part = current_part(storage, name, dir)?;
    Ok(part_path(name, dir, part))
}

/// Returns the path of the part after the current one.
///
/// # Errors
/// Returns an error if the directory scan fails or part numbers are exhausted.
pub fn next_path(storage: &dyn Storage, name: &str, dir: &Path) -> LogResult<PathBuf> {
    let part = current_part(storage, name, dir)?
        .checked_add(1)
        .ok_or_else(|| LogError::config(format!("part numbers exhausted for stream '{name}'")))?;
    Ok(part_path(name, dir, part))
}
