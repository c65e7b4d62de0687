//! Append engine.
//!
//! [`LogEngine`] maps stream names to live [`AsyncLogFile`]s, filters records
//! by [`LoggingLevel`], formats them and rotates parts by size.
//!
//! # Rotation
//!
//! A record reserved at `[start, end)` with `start > 0` and `end` at or past
//! the size limit is not written to the current part. Instead the stream's
//! entry is swapped for the next part and the record is reserved again
//! there. A record reserved at offset 0 is always written, so a record larger
//! than the limit occupies a part of its own.
//!
//! The swap happens under the map's entry lock and only if the entry still
//! holds the file the caller observed; concurrent appenders that cross the
//! limit together produce exactly one new part. The replaced part is flushed
//! and closed once the last append still holding it has issued its write.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Local;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::io_worker::IoWorkerPool;
use crate::limits::ROTATION_OPEN_ATTEMPTS;
use crate::log_file::{AsyncLogFile, Completion, LockRetry};
use crate::naming;
use crate::record::{format_record, LoggingLevel, Severity};
use crate::storage::{FileStorage, Storage};

/// Stream used by [`LogEngine::append_info`].
pub const INFO_STREAM: &str = "info";
/// Stream used by [`LogEngine::append_error`].
pub const ERROR_STREAM: &str = "error";
/// Conventional stream for plain lines.
pub const DEFAULT_STREAM: &str = "out";

/// Size-rotating append engine.
#[derive(Debug)]
pub struct LogEngine {
    files: DashMap<String, Arc<AsyncLogFile>>,
    /// Streams closed explicitly; they reopen at the next part.
    reopen_next: DashSet<String>,
    level: RwLock<LoggingLevel>,
    size_limit: u64,
    dir: PathBuf,
    lock_retry: LockRetry,
    storage: Arc<dyn Storage>,
    pool: IoWorkerPool,
}

impl LogEngine {
    /// Creates an engine writing to the local filesystem.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the directory cannot
    /// be created or the worker pool cannot start.
    pub fn new(config: &LogConfig) -> LogResult<Self> {
        let engine = Self::with_storage(config, Arc::new(FileStorage::new()))?;
        warn_if_low_space(&engine.dir, config.space_min);
        Ok(engine)
    }

    /// Creates an engine on the given storage backend.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the directory cannot
    /// be created or the worker pool cannot start.
    pub fn with_storage(config: &LogConfig, storage: Arc<dyn Storage>) -> LogResult<Self> {
        config.validate()?;
        let dir = config.resolve_dir()?;
        storage.create_dir_all(&dir)?;
        let pool = IoWorkerPool::new(config.io_workers)?;

        tracing::info!(
            dir = %dir.display(),
            level = %config.level,
            size_limit = config.log_size,
            "log engine started"
        );

        Ok(Self {
            files: DashMap::new(),
            reopen_next: DashSet::new(),
            level: RwLock::new(config.level),
            size_limit: config.log_size,
            dir,
            lock_retry: config.lock_retry,
            storage,
            pool,
        })
    }

    /// Returns the log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the per-part size limit.
    #[must_use]
    pub const fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Returns the current logging level.
    #[must_use]
    pub fn level(&self) -> LoggingLevel {
        *self.level.read()
    }

    /// Changes the logging level for subsequent appends.
    pub fn set_level(&self, level: LoggingLevel) {
        *self.level.write() = level;
    }

    /// Appends an informational record to `stream`.
    ///
    /// Returns `Ok(false)` without any I/O if the level filters the record.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened or rotated.
    pub fn append(&self, stream: &str, text: &str) -> LogResult<bool> {
        self.append_record(stream, Severity::Info, text, None)
    }

    /// Appends an informational record to the `info` stream.
    ///
    /// # Errors
    /// See [`append`](Self::append).
    pub fn append_info(&self, text: &str) -> LogResult<bool> {
        self.append(INFO_STREAM, text)
    }

    /// Appends an error record with its cause chain to the `error` stream.
    ///
    /// # Errors
    /// See [`append`](Self::append).
    pub fn append_error(&self, text: &str, cause: Option<&(dyn Error + 'static)>) -> LogResult<bool> {
        self.append_error_to(ERROR_STREAM, text, cause)
    }

    /// Appends an error record with its cause chain to `stream`.
    ///
    /// # Errors
    /// See [`append`](Self::append).
    pub fn append_error_to(
        &self,
        stream: &str,
        text: &str,
        cause: Option<&(dyn Error + 'static)>,
    ) -> LogResult<bool> {
        self.append_record(stream, Severity::Error, text, cause)
    }

    /// Appends bytes as they are, without timestamp or delimiter.
    ///
    /// Filtered like an informational record.
    ///
    /// # Errors
    /// See [`append`](Self::append).
    pub fn append_raw(&self, stream: &str, data: Bytes) -> LogResult<bool> {
        if !self.level().admits(Severity::Info) {
            return Ok(false);
        }
        let _ = self.write_record(stream, data)?;
        Ok(true)
    }

    fn append_record(
        &self,
        stream: &str,
        severity: Severity,
        text: &str,
        cause: Option<&(dyn Error + 'static)>,
    ) -> LogResult<bool> {
        if !self.level().admits(severity) {
            return Ok(false);
        }
        let record = format_record(&Local::now(), text, cause);
        let _ = self.write_record(stream, Bytes::from(record.into_bytes()))?;
        Ok(true)
    }

    /// Reserves room for `data` on the stream's current part, rotating as
    /// needed, and issues the write.
    fn write_record(&self, stream: &str, data: Bytes) -> LogResult<Completion> {
        let len = data.len() as u64;
        loop {
            let file = self.file_for(stream)?;
            let reservation = file.reserve(len)?;

            if reservation.offset() > 0 && reservation.end() >= self.size_limit {
                self.rotate(stream, &file)?;
                continue;
            }
            return Ok(file.write_reserved(reservation, data));
        }
    }

    /// Returns the live file of `stream`, opening it on first use.
    fn file_for(&self, stream: &str) -> LogResult<Arc<AsyncLogFile>> {
        if let Some(file) = self.files.get(stream) {
            return Ok(Arc::clone(file.value()));
        }

        match self.files.entry(stream.to_owned()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let reopen = self.reopen_next.contains(stream);
                let path = if reopen {
                    naming::next_path(self.storage.as_ref(), stream, &self.dir)?
                } else {
                    naming::current_path(self.storage.as_ref(), stream, &self.dir)?
                };
                let file = Arc::new(self.open_file(&path)?);
                entry.insert(Arc::clone(&file));
                if reopen {
                    self.reopen_next.remove(stream);
                }
                Ok(file)
            }
        }
    }

    /// Replaces `observed` with the next part, unless another appender
    /// already did.
    fn rotate(&self, stream: &str, observed: &Arc<AsyncLogFile>) -> LogResult<()> {
        let Entry::Occupied(mut entry) = self.files.entry(stream.to_owned()) else {
            // Closed concurrently; the next lookup reopens it.
            return Ok(());
        };
        if !Arc::ptr_eq(entry.get(), observed) {
            return Ok(());
        }

        let next = Arc::new(self.open_next(stream, observed.path())?);
        let new_path = next.path().to_path_buf();
        let old = entry.insert(next);
        drop(entry);

        tracing::info!(
            stream,
            from = %old.path().display(),
            to = %new_path.display(),
            size = old.write_offset(),
            "rotated log stream"
        );
        Ok(())
    }

    /// Opens the part after the current one, retrying with a freshly scanned
    /// part number.
    ///
    /// A part that resolves to the file being replaced, or that is already at
    /// the size limit, counts as a failed attempt.
    fn open_next(&self, stream: &str, current: &Path) -> LogResult<AsyncLogFile> {
        let mut last_error = None;
        for attempt in 1..=ROTATION_OPEN_ATTEMPTS {
            let opened = naming::next_path(self.storage.as_ref(), stream, &self.dir)
                .and_then(|path| {
                    if path == current {
                        return Err(LogError::io(
                            "rotate",
                            format!("next part {} is the current part", path.display()),
                        ));
                    }
                    let file = self.open_file(&path)?;
                    if file.write_offset() >= self.size_limit {
                        return Err(LogError::io(
                            "rotate",
                            format!(
                                "next part {} already holds {} bytes",
                                path.display(),
                                file.write_offset()
                            ),
                        ));
                    }
                    Ok(file)
                });
            match opened {
                Ok(file) => return Ok(file),
                Err(e) => {
                    tracing::warn!(stream, attempt, error = %e, "opening next part failed");
                    last_error = Some(e);
                }
            }
        }

        let err = LogError::Rotation {
            stream: stream.to_owned(),
            attempts: ROTATION_OPEN_ATTEMPTS,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        };
        tracing::error!(stream, error = %err, "rotation failed, record not written");
        Err(err)
    }

    fn open_file(&self, path: &Path) -> LogResult<AsyncLogFile> {
        Ok(AsyncLogFile::open(self.storage.as_ref(), &self.pool, path)?
            .with_lock_retry(self.lock_retry))
    }

    /// Closes `stream`. The next append reopens it at the next part.
    ///
    /// The file is flushed and released once appends already holding it have
    /// issued their writes. Returns false if the stream was not open.
    pub fn close_stream(&self, stream: &str) -> bool {
        let Some((name, file)) = self.files.remove(stream) else {
            return false;
        };
        self.reopen_next.insert(name);
        tracing::debug!(stream, path = %file.path().display(), "closing log stream");
        drop(file);
        true
    }

    /// Closes every stream. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let names: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        names.iter().filter(|name| self.close_stream(name)).count()
    }

    /// Returns the path of the part `stream` is writing to, if it is open.
    #[must_use]
    pub fn current_file_info(&self, stream: &str) -> Option<PathBuf> {
        self.files.get(stream).map(|f| f.path().to_path_buf())
    }

    /// Forces every open stream to durable storage and waits for it.
    ///
    /// Writes issued before the call are covered. Must not be called from an
    /// async context.
    ///
    /// # Errors
    /// Returns the first flush error; every stream is flushed regardless.
    pub fn flush_all(&self) -> LogResult<()> {
        let files: Vec<Arc<AsyncLogFile>> =
            self.files.iter().map(|e| Arc::clone(e.value())).collect();

        let mut first_error = None;
        for completion in files.iter().map(|f| f.flush()).collect::<Vec<_>>() {
            if let Err(e) = completion.wait() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for LogEngine {
    fn drop(&mut self) {
        let open = self.files.len();
        // Each file flushes and closes when its last reference goes.
        self.files.clear();
        tracing::debug!(open, "log engine stopped");
    }
}

/// Logs a warning if the filesystem holding `dir` has less than `space_min`
/// bytes available.
#[cfg(unix)]
fn warn_if_low_space(dir: &Path, space_min: u64) {
    match nix::sys::statvfs::statvfs(dir) {
        Ok(stat) => {
            let available = u64::from(stat.blocks_available())
                .saturating_mul(u64::from(stat.fragment_size()));
            if available < space_min {
                tracing::warn!(dir = %dir.display(), available, space_min, "low disk space");
            }
        }
        Err(e) => tracing::debug!(dir = %dir.display(), error = %e, "free space check failed"),
    }
}

#[cfg(not(unix))]
fn warn_if_low_space(dir: &Path, space_min: u64) {
    tracing::debug!(dir = %dir.display(), space_min, "free space check unavailable");
}
