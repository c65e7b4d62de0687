//! Storage abstraction for log files.
//!
//! The traits here are deliberately small: positional reads and writes,
//! durability, size and advisory byte-range locks. Everything above that
//! (cursors, flush policy, rotation, framing) lives in the log file and
//! engine layers.
//!
//! Calls are blocking. They run on the I/O worker threads
//! ([`crate::io_worker`]), which turn them into completions for the rest of
//! the crate.
//!
//! # Available Backends
//!
//! - [`FileStorage`]: the local filesystem, with POSIX record locks for byte ranges
//! - [`SimulatedStorage`]: in-memory files with deterministic fault injection

mod file;
mod simulated;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::LogResult;

pub use file::FileStorage;
pub use simulated::{FaultConfig, FaultStats, SimulatedFile, SimulatedStorage};

/// Storage backend for log files.
///
/// Implementations must be `Send + Sync`; one backend is shared by every
/// stream of an engine or tailer.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Opens a file for reading and writing, creating it if absent.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or created.
    fn open(&self, path: &Path) -> LogResult<Arc<dyn StorageFile>>;

    /// Checks if a file exists at the given path.
    ///
    /// # Errors
    /// Returns an error if the check itself fails.
    fn exists(&self, path: &Path) -> LogResult<bool>;

    /// Lists the files directly inside `dir`, sorted by path.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    fn list_files(&self, dir: &Path) -> LogResult<Vec<PathBuf>>;

    /// Creates a directory and all parent directories.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    fn create_dir_all(&self, path: &Path) -> LogResult<()>;
}

/// A handle to an open file.
pub trait StorageFile: Send + Sync + fmt::Debug {
    /// Writes all of `data` at `offset`. Returns the bytes written.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn write_at(&self, offset: u64, data: &[u8]) -> LogResult<usize>;

    /// Reads up to `len` bytes at `offset`. Returns fewer bytes at end of file.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    fn read_at(&self, offset: u64, len: usize) -> LogResult<Bytes>;

    /// Forces written data to durable storage.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    fn sync(&self) -> LogResult<()>;

    /// Returns the current file size in bytes.
    ///
    /// # Errors
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> LogResult<u64>;

    /// Tries to take an exclusive advisory lock on `[offset, offset + len)`.
    ///
    /// Returns `Ok(false)` if another handle holds a conflicting lock.
    ///
    /// # Errors
    /// Returns an error if the lock call fails for any other reason.
    fn try_lock_range(&self, offset: u64, len: u64) -> LogResult<bool>;

    /// Releases a lock taken with [`try_lock_range`](Self::try_lock_range).
    ///
    /// # Errors
    /// Returns an error if the unlock call fails.
    fn unlock_range(&self, offset: u64, len: u64) -> LogResult<()>;
}
