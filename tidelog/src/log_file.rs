//! Asynchronous log file.
//!
//! [`AsyncLogFile`] lets many producers append to one file without a lock:
//!
//! 1. [`reserve`](AsyncLogFile::reserve) claims a disjoint byte range with a
//!    compare-and-swap loop on the write cursor. Nothing touches disk.
//! 2. [`write_reserved`](AsyncLogFile::write_reserved) hands the bytes to an
//!    I/O worker and returns a [`Completion`] immediately.
//! 3. When the write completes the worker forces a sync once more than
//!    [`FLUSH_THRESHOLD_BYTES`](crate::limits::FLUSH_THRESHOLD_BYTES) have
//!    been written since the last one.
//!
//! Writes may complete out of order, so a reader can briefly observe a
//! zero-filled gap before an earlier range lands.
//!
//! The file also keeps a read cursor for tailing, advanced by the bytes each
//! cursor read transfers.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{LogError, LogResult};
use crate::io_worker::IoWorkerPool;
use crate::limits::FLUSH_THRESHOLD_BYTES;
use crate::storage::{Storage, StorageFile};

/// Retry policy for byte-range locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRetry {
    /// Retry until the lock is granted, yielding between attempts.
    #[default]
    Unbounded,
    /// Give up with [`LogError::LockContended`] after this many attempts.
    Bounded(u32),
}

/// A byte range claimed on the write cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    offset: u64,
    len: u64,
}

impl Reservation {
    /// Start of the range.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for a zero-length reservation.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// End of the range (exclusive).
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Outcome of an issued I/O operation.
///
/// Await it from async code or call [`wait`](Self::wait) from a plain thread.
/// Dropping it does not cancel the operation.
#[derive(Debug)]
#[must_use = "a completion reports whether the operation succeeded"]
pub struct Completion<T = usize> {
    rx: oneshot::Receiver<LogResult<T>>,
    offset: u64,
    len: u64,
}

impl<T> Completion<T> {
    fn pending(offset: u64, len: u64) -> (oneshot::Sender<LogResult<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx, offset, len })
    }

    fn ready(result: LogResult<T>, offset: u64, len: u64) -> Self {
        let (tx, completion) = Self::pending(offset, len);
        let _ = tx.send(result);
        completion
    }

    /// Offset the operation was issued at.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the operation in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the operation covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Blocks the current thread until the operation completes.
    ///
    /// Must not be called from an async context or from an I/O worker.
    ///
    /// # Errors
    /// Returns the operation's error, or [`LogError::WorkerStopped`] if the
    /// worker went away without completing it.
    pub fn wait(self) -> LogResult<T> {
        self.rx.blocking_recv().map_err(|_| LogError::WorkerStopped)?
    }
}

impl<T> Future for Completion<T> {
    type Output = LogResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(LogError::WorkerStopped)))
    }
}

/// State shared between the file and its in-flight continuations.
#[derive(Debug)]
struct FileShared {
    path: PathBuf,
    /// `None` once the close has been issued.
    handle: RwLock<Option<Arc<dyn StorageFile>>>,
    write_offset: AtomicU64,
    read_offset: AtomicU64,
    /// Write cursor position covered by the most recent sync.
    last_flush: AtomicU64,
    closed: AtomicBool,
}

impl FileShared {
    fn handle(&self) -> LogResult<Arc<dyn StorageFile>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        self.handle.read().clone().ok_or_else(|| self.closed_error())
    }

    fn closed_error(&self) -> LogError {
        LogError::Closed {
            path: self.path.clone(),
        }
    }
}

/// Runs on the worker after every write.
///
/// Forces a sync once the written range ends more than the flush threshold
/// past the last flush marker. A write that completes after the file was
/// closed is synced unconditionally.
fn write_completion(
    shared: &FileShared,
    file: &dyn StorageFile,
    result: &LogResult<usize>,
    offset: u64,
    len: u64,
) {
    if let Err(e) = result {
        tracing::error!(path = %shared.path.display(), offset, len, error = %e, "log write failed");
        return;
    }

    if shared.closed.load(Ordering::Acquire) {
        if let Err(e) = file.sync() {
            tracing::warn!(path = %shared.path.display(), error = %e, "sync after close failed");
        }
        return;
    }

    let end = offset + len;
    let last = shared.last_flush.load(Ordering::Acquire);
    if end > last
        && end - last > FLUSH_THRESHOLD_BYTES
        && shared
            .last_flush
            .compare_exchange(last, end, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    {
        tracing::trace!(path = %shared.path.display(), end, "flush threshold reached");
        if let Err(e) = file.sync() {
            tracing::warn!(path = %shared.path.display(), error = %e, "threshold sync failed");
        }
    }
}

/// Unlocks a byte range when dropped.
struct RangeLockGuard {
    file: Arc<dyn StorageFile>,
    offset: u64,
    len: u64,
}

impl Drop for RangeLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock_range(self.offset, self.len) {
            tracing::warn!(offset = self.offset, len = self.len, error = %e, "unlock failed");
        }
    }
}

/// An append-oriented file with lock-free reservations and completion-based
/// writes.
#[derive(Debug)]
pub struct AsyncLogFile {
    shared: Arc<FileShared>,
    pool: IoWorkerPool,
    route: u64,
    lock_retry: LockRetry,
}

impl AsyncLogFile {
    /// Opens or creates the file at `path`.
    ///
    /// The write cursor starts at the current file length, the read cursor
    /// at 0.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its size read.
    pub fn open(storage: &dyn Storage, pool: &IoWorkerPool, path: &Path) -> LogResult<Self> {
        let handle = storage.open(path)?;
        let size = handle.size()?;

        tracing::info!(path = %path.display(), size, "opened log file");

        Ok(Self {
            shared: Arc::new(FileShared {
                path: path.to_path_buf(),
                handle: RwLock::new(Some(handle)),
                write_offset: AtomicU64::new(size),
                read_offset: AtomicU64::new(0),
                last_flush: AtomicU64::new(size),
                closed: AtomicBool::new(false),
            }),
            pool: pool.clone(),
            route: pool.alloc_route(),
            lock_retry: LockRetry::default(),
        })
    }

    /// Sets the retry policy for byte-range locks.
    #[must_use]
    pub fn with_lock_retry(mut self, lock_retry: LockRetry) -> Self {
        self.lock_retry = lock_retry;
        self
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Returns the write cursor: the end of the last reservation.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.shared.write_offset.load(Ordering::Acquire)
    }

    /// Returns the read cursor.
    #[must_use]
    pub fn read_offset(&self) -> u64 {
        self.shared.read_offset.load(Ordering::Acquire)
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Claims `len` bytes at the write cursor.
    ///
    /// Never blocks on I/O. Concurrent reservations receive disjoint ranges.
    ///
    /// # Errors
    /// Returns [`LogError::OffsetExhausted`] if the cursor would overflow and
    /// [`LogError::Closed`] if the file is closed.
    pub fn reserve(&self, len: u64) -> LogResult<Reservation> {
        if self.is_closed() {
            return Err(self.shared.closed_error());
        }

        let cursor = &self.shared.write_offset;
        let mut current = cursor.load(Ordering::Acquire);
        loop {
            let end = current
                .checked_add(len)
                .ok_or(LogError::OffsetExhausted {
                    offset: current,
                    len,
                })?;
            match cursor.compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Ok(Reservation {
                        offset: current,
                        len,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Issues the write of `data` into a reserved range.
    pub fn write_reserved(&self, reservation: Reservation, data: Bytes) -> Completion {
        debug_assert_eq!(data.len() as u64, reservation.len);
        self.write_at(reservation.offset, data)
    }

    /// Reserves room for `data` and issues the write.
    ///
    /// # Errors
    /// Returns the reservation error; write failures arrive on the completion.
    pub fn reserve_and_write(&self, data: Bytes) -> LogResult<Completion> {
        let reservation = self.reserve(data.len() as u64)?;
        Ok(self.write_reserved(reservation, data))
    }

    /// Issues a write at an explicit offset. The write cursor is not moved.
    pub fn write_at(&self, offset: u64, data: Bytes) -> Completion {
        let len = data.len() as u64;
        let file = match self.shared.handle() {
            Ok(file) => file,
            Err(e) => return Completion::ready(Err(e), offset, len),
        };

        let (tx, completion) = Completion::pending(offset, len);
        let shared = Arc::clone(&self.shared);
        let continuation_file = Arc::clone(&file);
        self.pool.write(
            self.route,
            file,
            offset,
            data,
            Box::new(move |result| {
                write_completion(&shared, continuation_file.as_ref(), &result, offset, len);
                let _ = tx.send(result);
            }),
        );
        completion
    }

    /// Writes `data` and blocks until the write completes.
    ///
    /// With `offset == None` the range is reserved at the write cursor. With
    /// `with_lock` the byte-range lock on `[offset, offset + len)` is held for
    /// the duration of the write.
    ///
    /// Must not be called from an async context or from an I/O worker.
    ///
    /// # Errors
    /// Returns reservation, lock or write errors.
    pub fn write_sync(&self, data: Bytes, offset: Option<u64>, with_lock: bool) -> LogResult<usize> {
        let len = data.len() as u64;
        let offset = match offset {
            Some(offset) => offset,
            None => self.reserve(len)?.offset,
        };

        let _guard = if with_lock {
            self.lock_range(offset, len)?
        } else {
            None
        };
        self.write_at(offset, data).wait()
    }

    /// Reads up to `len` bytes and blocks until the read completes.
    ///
    /// With `offset == None` the read starts at the read cursor, which then
    /// advances by the bytes transferred. An explicit offset leaves the cursor
    /// alone.
    ///
    /// Must not be called from an async context or from an I/O worker.
    ///
    /// # Errors
    /// Returns lock or read errors; the cursor does not move on failure.
    pub fn read_sync(&self, len: usize, offset: Option<u64>, with_lock: bool) -> LogResult<Bytes> {
        let file = self.shared.handle()?;
        let at = offset.unwrap_or_else(|| self.read_offset());

        let _guard = if with_lock {
            self.lock_range(at, len as u64)?
        } else {
            None
        };

        let (tx, completion) = Completion::<Bytes>::pending(at, len as u64);
        self.pool.read(
            self.route,
            file,
            at,
            len,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        let bytes = completion.wait()?;

        if offset.is_none() {
            self.shared
                .read_offset
                .fetch_add(bytes.len() as u64, Ordering::AcqRel);
        }
        Ok(bytes)
    }

    /// Issues a read of up to `len` bytes at the read cursor.
    ///
    /// `on_complete` runs on an I/O worker. The cursor advances by the bytes
    /// transferred before it runs.
    ///
    /// # Errors
    /// Returns [`LogError::Closed`] if the file is closed; `on_complete` is
    /// not called in that case.
    pub fn read_async<F>(&self, len: usize, on_complete: F) -> LogResult<()>
    where
        F: FnOnce(LogResult<Bytes>) + Send + 'static,
    {
        let file = self.shared.handle()?;
        let offset = self.read_offset();
        let shared = Arc::clone(&self.shared);

        self.pool.read(
            self.route,
            file,
            offset,
            len,
            Box::new(move |result| {
                if let Ok(bytes) = &result {
                    shared
                        .read_offset
                        .fetch_add(bytes.len() as u64, Ordering::AcqRel);
                }
                on_complete(result);
            }),
        );
        Ok(())
    }

    /// Forces written data to durable storage.
    pub fn flush(&self) -> Completion<()> {
        let file = match self.shared.handle() {
            Ok(file) => file,
            Err(e) => return Completion::ready(Err(e), 0, 0),
        };

        let mark = self.write_offset();
        let (tx, completion) = Completion::pending(0, mark);
        let shared = Arc::clone(&self.shared);
        self.pool.sync(
            self.route,
            file,
            Box::new(move |result| {
                if result.is_ok() {
                    shared.last_flush.fetch_max(mark, Ordering::AcqRel);
                }
                let _ = tx.send(result);
            }),
        );
        completion
    }

    /// Flushes and releases the file.
    ///
    /// Runs after every operation issued before it. Calling it again is a
    /// no-op that completes immediately.
    pub fn close(&self) -> Completion<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Completion::ready(Ok(()), 0, 0);
        }

        let Some(file) = self.shared.handle.write().take() else {
            return Completion::ready(Ok(()), 0, 0);
        };

        let (tx, completion) = Completion::pending(0, 0);
        let path = self.shared.path.clone();
        let size = self.write_offset();
        self.pool.close(
            self.route,
            file,
            Box::new(move |result| {
                match &result {
                    Ok(()) => tracing::info!(path = %path.display(), size, "closed log file"),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "flush on close failed");
                    }
                }
                let _ = tx.send(result);
            }),
        );
        completion
    }

    fn lock_range(&self, offset: u64, len: u64) -> LogResult<Option<RangeLockGuard>> {
        if len == 0 {
            return Ok(None);
        }

        let file = self.shared.handle()?;
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            if file.try_lock_range(offset, len)? {
                return Ok(Some(RangeLockGuard { file, offset, len }));
            }
            if let LockRetry::Bounded(max) = self.lock_retry {
                if attempts >= max {
                    return Err(LogError::LockContended {
                        offset,
                        len,
                        attempts,
                    });
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Drop for AsyncLogFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::storage::{FaultConfig, FileStorage, SimulatedStorage};

    fn sim_file(storage: &SimulatedStorage, name: &str) -> (AsyncLogFile, PathBuf) {
        let pool = IoWorkerPool::new(2).unwrap();
        let path = PathBuf::from(format!("/logs/{name}.000.log"));
        (AsyncLogFile::open(storage, &pool, &path).unwrap(), path)
    }

    #[test]
    fn test_open_positions_cursors() {
        let storage = SimulatedStorage::new(0);
        storage.set_raw_content(Path::new("/logs/pos.000.log"), b"0123456789".to_vec());
        let (file, _) = sim_file(&storage, "pos");

        assert_eq!(file.write_offset(), 10);
        assert_eq!(file.read_offset(), 0);
        assert!(!file.is_closed());
    }

    #[tokio::test]
    async fn test_reserve_and_write() {
        let storage = SimulatedStorage::new(0);
        let (file, path) = sim_file(&storage, "rw");

        let first = file.reserve_and_write(Bytes::from_static(b"hello\r\n")).unwrap();
        let second = file.reserve_and_write(Bytes::from_static(b"world\r\n")).unwrap();
        assert_eq!((first.offset(), second.offset()), (0, 7));

        assert_eq!(first.await.unwrap(), 7);
        assert_eq!(second.await.unwrap(), 7);
        assert_eq!(file.write_offset(), 14);
        assert_eq!(storage.get_raw_content(&path).unwrap(), b"hello\r\nworld\r\n");
    }

    #[test]
    fn test_reserve_overflow() {
        let storage = SimulatedStorage::new(0);
        let (file, _) = sim_file(&storage, "ovf");
        file.shared.write_offset.store(u64::MAX - 4, Ordering::Release);

        let err = file.reserve(8).unwrap_err();
        assert!(matches!(err, LogError::OffsetExhausted { offset, len: 8 } if offset == u64::MAX - 4));
        assert_eq!(file.write_offset(), u64::MAX - 4);
    }

    #[test]
    fn test_concurrent_reservations_are_disjoint_and_contiguous() {
        let storage = SimulatedStorage::new(0);
        storage.set_raw_content(Path::new("/logs/cc.000.log"), vec![b'x'; 100]);
        let (file, _) = sim_file(&storage, "cc");
        let file = Arc::new(file);

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let file = Arc::clone(&file);
                std::thread::spawn(move || {
                    (0..500u64)
                        .map(|i| file.reserve(1 + (t + i) % 13).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Reservation> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_by_key(Reservation::offset);

        let mut cursor = 100;
        for r in &all {
            assert_eq!(r.offset(), cursor);
            cursor = r.end();
        }
        assert_eq!(cursor, file.write_offset());
    }

    #[test]
    fn test_threshold_flush() {
        let storage = SimulatedStorage::new(0);
        let (file, path) = sim_file(&storage, "flush");

        file.reserve_and_write(Bytes::from(vec![b'a'; 100]))
            .unwrap()
            .wait()
            .unwrap();
        assert!(storage.get_synced_content(&path).is_none());

        file.reserve_and_write(Bytes::from(vec![b'b'; 4_100]))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(storage.get_synced_content(&path).unwrap().len(), 4_200);
    }

    #[test]
    fn test_crash_loses_at_most_one_flush_window() {
        let storage = SimulatedStorage::new(0);
        let (file, path) = sim_file(&storage, "crash");

        let record = Bytes::from(vec![b'r'; 100]);
        for _ in 0..100 {
            file.reserve_and_write(record.clone()).unwrap().wait().unwrap();
        }
        storage.simulate_crash();

        let survived = storage.get_raw_content(&path).unwrap_or_default();
        assert!(survived.len() as u64 + FLUSH_THRESHOLD_BYTES >= 10_000);
        assert_eq!(survived.len() % 100, 0);
        assert!(survived.iter().all(|&b| b == b'r'));
    }

    #[test]
    fn test_write_failure_reaches_completion() {
        let storage =
            SimulatedStorage::with_faults(0, FaultConfig::none().with_force_disk_full());
        let (file, _) = sim_file(&storage, "full");

        let err = file
            .reserve_and_write(Bytes::from_static(b"x\r\n"))
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(matches!(err, LogError::Io { operation: "write", .. }));
    }

    #[test]
    fn test_close_is_idempotent_and_flushes_once() {
        let storage = SimulatedStorage::new(0);
        let (file, path) = sim_file(&storage, "close");

        let _ = file.write_at(0, Bytes::from_static(b"tail\r\n"));
        file.close().wait().unwrap();
        assert!(file.is_closed());
        assert_eq!(storage.get_synced_content(&path).unwrap(), b"tail\r\n");

        // A second flush would consume the forced failure.
        storage.fault_config().force_sync_fail = true;
        file.close().wait().unwrap();
        assert_eq!(storage.fault_stats().sync_failures, 0);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let storage = SimulatedStorage::new(0);
        let (file, _) = sim_file(&storage, "after");
        file.close().wait().unwrap();

        assert!(matches!(file.reserve(1), Err(LogError::Closed { .. })));
        assert!(matches!(
            file.write_at(0, Bytes::from_static(b"x")).wait(),
            Err(LogError::Closed { .. })
        ));
        assert!(matches!(file.read_async(8, |_| {}), Err(LogError::Closed { .. })));
        assert!(matches!(file.flush().wait(), Err(LogError::Closed { .. })));
    }

    #[test]
    fn test_read_sync_advances_cursor() {
        let storage = SimulatedStorage::new(0);
        storage.set_raw_content(Path::new("/logs/rd.000.log"), b"abcdefgh".to_vec());
        let (file, _) = sim_file(&storage, "rd");

        assert_eq!(&file.read_sync(3, None, false).unwrap()[..], b"abc");
        assert_eq!(&file.read_sync(100, None, true).unwrap()[..], b"defgh");
        assert!(file.read_sync(100, None, false).unwrap().is_empty());
        assert_eq!(file.read_offset(), 8);

        // Explicit offsets leave the cursor alone.
        assert_eq!(&file.read_sync(2, Some(1), false).unwrap()[..], b"bc");
        assert_eq!(file.read_offset(), 8);
    }

    #[test]
    fn test_read_failure_does_not_move_cursor() {
        let storage =
            SimulatedStorage::with_faults(0, FaultConfig::none().with_read_fail_rate(1.0));
        storage.set_raw_content(Path::new("/logs/rf.000.log"), b"abc".to_vec());
        let (file, _) = sim_file(&storage, "rf");

        assert!(file.read_sync(3, None, false).is_err());
        assert_eq!(file.read_offset(), 0);
    }

    #[tokio::test]
    async fn test_read_async_advances_before_continuation() {
        let storage = SimulatedStorage::new(0);
        storage.set_raw_content(Path::new("/logs/ra.000.log"), b"line\r\n".to_vec());
        let (file, _) = sim_file(&storage, "ra");
        let file = Arc::new(file);

        let (tx, rx) = oneshot::channel();
        let observer = Arc::clone(&file);
        file.read_async(64, move |result| {
            let _ = tx.send((result.map(|b| b.to_vec()), observer.read_offset()));
        })
        .unwrap();

        let (bytes, cursor_seen) = rx.await.unwrap();
        assert_eq!(bytes.unwrap(), b"line\r\n");
        assert_eq!(cursor_seen, 6);
    }

    #[test]
    fn test_write_sync_with_lock() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("locked.000.log");
        let pool = IoWorkerPool::new(1).unwrap();
        let file = AsyncLogFile::open(&FileStorage::new(), &pool, &path).unwrap();

        assert_eq!(file.write_sync(Bytes::from_static(b"abc"), None, true).unwrap(), 3);
        assert_eq!(file.write_sync(Bytes::from_static(b"Z"), Some(1), true).unwrap(), 1);
        assert_eq!(file.write_offset(), 3);

        file.close().wait().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"aZc");
    }

    #[test]
    fn test_bounded_lock_retry_gives_up() {
        let storage = SimulatedStorage::new(0);
        let (file, path) = sim_file(&storage, "contended");
        let file = file.with_lock_retry(LockRetry::Bounded(5));

        storage.hold_foreign_lock(&path, 0, 0);
        let err = file
            .write_sync(Bytes::from_static(b"x"), None, true)
            .unwrap_err();
        assert!(matches!(err, LogError::LockContended { attempts: 5, .. }));

        storage.release_foreign_locks(&path);
        assert_eq!(file.write_sync(Bytes::from_static(b"y"), Some(0), true).unwrap(), 1);
    }

    #[test]
    fn test_unbounded_lock_retry_waits_for_release() {
        let storage = SimulatedStorage::new(0);
        let (file, path) = sim_file(&storage, "waiter");

        storage.hold_foreign_lock(&path, 0, 4);
        let releaser = {
            let storage = storage.clone();
            let path = path.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                storage.release_foreign_locks(&path);
            })
        };

        assert_eq!(file.write_sync(Bytes::from_static(b"wait"), None, true).unwrap(), 4);
        releaser.join().unwrap();
    }

    proptest! {
        /// Sequential reservations tile the file from the initial cursor.
        #[test]
        fn reservations_tile_the_cursor(lens in proptest::collection::vec(0u64..10_000, 1..64)) {
            let storage = SimulatedStorage::new(0);
            let (file, _) = sim_file(&storage, "tile");

            let mut cursor = 0;
            for len in &lens {
                let r = file.reserve(*len).unwrap();
                prop_assert_eq!(r.offset(), cursor);
                cursor = r.end();
            }
            prop_assert_eq!(file.write_offset(), lens.iter().sum::<u64>());
        }
    }
}
