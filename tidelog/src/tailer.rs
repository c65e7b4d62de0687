//! Live tailing reader.
//!
//! [`LogTailer`] follows log files while they grow. Each subscription owns a
//! polling thread that cycles through:
//!
//! ```text
//!            ┌────────────────────────────────────────────┐
//!            ▼                                            │
//!   Polling: issue one read at the read cursor            │
//!            wait up to `interval` for the read to land   │
//!            │                                            │
//!            ▼                                            │
//!   Framing: deliver every framed record, then one empty  │
//!            heartbeat record ────────────────────────────┘
//!
//!   Stopped: the callback returned false or the stream was removed
//! ```
//!
//! Reads complete on the I/O workers, which push the bytes into the stream's
//! [`LineFramer`] and wake the polling thread. At most one read per stream
//! is in flight, so the read cursor never races with itself. Records that
//! hold only the delimiter are skipped. A failed read is logged and the
//! loop carries on with heartbeats.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::framing::{LineFramer, RECORD_DELIMITER};
use crate::io_worker::IoWorkerPool;
use crate::log_file::AsyncLogFile;
use crate::naming;
use crate::storage::{FileStorage, Storage};

/// Lifetime of one subscription. Survives [`LogTailer::next_log_path`].
#[derive(Debug, Default)]
struct Subscription {
    stopped: AtomicBool,
}

#[derive(Debug, Default)]
struct SignalState {
    /// Bytes arrived since the polling thread last looked.
    pending: bool,
    read_in_flight: bool,
}

/// Wakes the polling thread when a read lands.
#[derive(Debug, Default)]
struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    fn notify(&self) {
        self.state.lock().pending = true;
        self.cond.notify_all();
    }

    /// Waits up to `timeout` for a notification. Returns true if one arrived.
    fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.pending {
            self.cond
                .wait_while_for(&mut state, |s| !s.pending, timeout);
        }
        std::mem::take(&mut state.pending)
    }

    /// Marks a read as issued. Returns false if one is already in flight.
    fn begin_read(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.read_in_flight, true)
    }

    fn end_read(&self, notify: bool) {
        let mut state = self.state.lock();
        state.read_in_flight = false;
        if notify {
            state.pending = true;
            drop(state);
            self.cond.notify_all();
        }
    }
}

/// A tailed file with its framing state.
#[derive(Debug)]
struct TailedStream {
    file: AsyncLogFile,
    framer: Mutex<LineFramer>,
    signal: Signal,
    subscription: Arc<Subscription>,
}

impl TailedStream {
    fn stop(&self) {
        self.subscription.stopped.store(true, Ordering::Release);
        self.signal.notify();
    }

    /// Issues a read unless one is in flight.
    fn poll(self: &Arc<Self>, chunk_size: usize) {
        if !self.signal.begin_read() {
            return;
        }

        let stream = Arc::clone(self);
        let issued = self.file.read_async(chunk_size, move |result| {
            let arrived = match result {
                Ok(bytes) => stream.accept(&bytes),
                Err(e) => {
                    tracing::warn!(path = %stream.file.path().display(), error = %e, "tail read failed");
                    false
                }
            };
            stream.signal.end_read(arrived);
        });

        if let Err(e) = issued {
            tracing::warn!(path = %self.file.path().display(), error = %e, "tail read not issued");
            self.signal.end_read(false);
        }
    }

    /// Feeds read bytes to the framer. Returns true if any arrived.
    fn accept(&self, bytes: &Bytes) -> bool {
        if bytes.is_empty() {
            return false;
        }
        if let Err(e) = self.framer.lock().push(bytes) {
            tracing::warn!(path = %self.file.path().display(), error = %e, "tail framing overflow");
        }
        true
    }
}

/// Follows log files and delivers their records line by line.
#[derive(Debug)]
pub struct LogTailer {
    streams: Arc<DashMap<String, Arc<TailedStream>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    dir: PathBuf,
    chunk_size: usize,
    interval: Duration,
    storage: Arc<dyn Storage>,
    pool: IoWorkerPool,
}

impl LogTailer {
    /// Creates a tailer reading from the local filesystem.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the directory cannot
    /// be created or the worker pool cannot start.
    pub fn new(config: &LogConfig) -> LogResult<Self> {
        Self::with_storage(config, Arc::new(FileStorage::new()))
    }

    /// Creates a tailer on the given storage backend.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the directory cannot
    /// be created or the worker pool cannot start.
    pub fn with_storage(config: &LogConfig, storage: Arc<dyn Storage>) -> LogResult<Self> {
        config.validate()?;
        let dir = config.resolve_dir()?;
        storage.create_dir_all(&dir)?;
        let pool = IoWorkerPool::new(config.io_workers)?;

        Ok(Self {
            streams: Arc::new(DashMap::new()),
            threads: Mutex::new(Vec::new()),
            dir,
            chunk_size: config.buffer_size,
            interval: config.interval(),
            storage,
            pool,
        })
    }

    /// Returns the log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Subscribes to a stream and starts its polling thread.
    ///
    /// `name` is a stream name, resolved to the stream's current part. A name
    /// whose file name contains a `.` names a file directly, relative to the
    /// log directory unless rooted; the stream is then keyed by the part
    /// before the first `.`.
    ///
    /// `on_line` receives every record with its delimiter, plus an empty
    /// record after each poll. Returning false ends the subscription.
    /// Subscribing again under the same key replaces the old subscription.
    ///
    /// Returns the path being tailed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be resolved or opened or the
    /// thread cannot be spawned.
    pub fn subscribe<F>(&self, name: &str, on_line: F) -> LogResult<PathBuf>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        let (key, path) = self.resolve(name)?;
        let stream = Arc::new(self.open_stream(&path, Arc::new(Subscription::default()))?);
        let subscription = Arc::clone(&stream.subscription);

        if let Some(old) = self.streams.insert(key.clone(), stream) {
            old.stop();
        }

        let streams = Arc::clone(&self.streams);
        let thread_key = key.clone();
        let chunk_size = self.chunk_size;
        let interval = self.interval;
        let handle = std::thread::Builder::new()
            .name(format!("tail-{key}"))
            .spawn(move || {
                poll_loop(&streams, &thread_key, &subscription, chunk_size, interval, on_line);
            })
            .map_err(|e| LogError::io("spawn_tailer", e))?;

        let mut threads = self.threads.lock();
        threads.retain(|h| !h.is_finished());
        threads.push(handle);
        drop(threads);

        tracing::info!(stream = %key, path = %path.display(), "subscribed");
        Ok(path)
    }

    /// Subscribes with records decoded as UTF-8 (lossy).
    ///
    /// # Errors
    /// See [`subscribe`](Self::subscribe).
    pub fn subscribe_text<F>(&self, name: &str, mut on_line: F) -> LogResult<PathBuf>
    where
        F: FnMut(&str) -> bool + Send + 'static,
    {
        self.subscribe(name, move |record| on_line(&String::from_utf8_lossy(record)))
    }

    /// Ends the subscription of `name` and releases its file.
    ///
    /// Returns false if there was none.
    pub fn unsubscribe(&self, name: &str) -> bool {
        let Some((_, stream)) = self.streams.remove(&stream_key(name)) else {
            return false;
        };
        stream.stop();
        true
    }

    /// Returns the path tailed for `name`, if subscribed.
    #[must_use]
    pub fn current_file_info(&self, name: &str) -> Option<PathBuf> {
        self.streams
            .get(&stream_key(name))
            .map(|s| s.file.path().to_path_buf())
    }

    /// Moves `name` to the part after its current one and returns its path.
    ///
    /// The polling thread, if any, continues on the new part from offset 0.
    ///
    /// # Errors
    /// Returns an error if the next part cannot be resolved or opened.
    pub fn next_log_path(&self, name: &str) -> LogResult<PathBuf> {
        let key = stream_key(name);
        let path = naming::next_path(self.storage.as_ref(), &key, &self.dir)?;

        let subscription = self
            .streams
            .get(&key)
            .map(|s| Arc::clone(&s.subscription))
            .unwrap_or_default();
        let stream = Arc::new(self.open_stream(&path, subscription)?);
        self.streams.insert(key.clone(), stream);

        tracing::info!(stream = %key, path = %path.display(), "moved to next part");
        Ok(path)
    }

    /// Stops every subscription and waits for the polling threads to exit.
    pub fn shutdown(&self) {
        self.stop_all();

        let current = std::thread::current().id();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("tail thread panicked");
            }
        }
    }

    fn stop_all(&self) {
        let keys: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, stream)) = self.streams.remove(&key) {
                stream.stop();
            }
        }
    }

    fn resolve(&self, name: &str) -> LogResult<(String, PathBuf)> {
        let key = stream_key(name);
        if key == name {
            let path = naming::current_path(self.storage.as_ref(), name, &self.dir)?;
            Ok((key, path))
        } else {
            Ok((key, self.dir.join(name)))
        }
    }

    fn open_stream(&self, path: &Path, subscription: Arc<Subscription>) -> LogResult<TailedStream> {
        let capacity = self.chunk_size.saturating_mul(2).max(RECORD_DELIMITER.len() + 1);
        Ok(TailedStream {
            file: AsyncLogFile::open(self.storage.as_ref(), &self.pool, path)?,
            framer: Mutex::new(LineFramer::new(capacity)),
            signal: Signal::default(),
            subscription,
        })
    }
}

impl Drop for LogTailer {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Key of the stream a subscription name refers to.
fn stream_key(name: &str) -> String {
    let path = Path::new(name);
    let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
        return name.to_owned();
    };
    let Some((stem, _)) = file_name.split_once('.') else {
        return name.to_owned();
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(stem).to_string_lossy().into_owned()
        }
        _ => stem.to_owned(),
    }
}

/// Body of a polling thread.
fn poll_loop<F>(
    streams: &DashMap<String, Arc<TailedStream>>,
    key: &str,
    subscription: &Arc<Subscription>,
    chunk_size: usize,
    interval: Duration,
    mut on_line: F,
) where
    F: FnMut(&[u8]) -> bool,
{
    let mut delivered = 0u64;
    loop {
        if subscription.stopped.load(Ordering::Acquire) {
            break;
        }
        let Some(stream) = streams.get(key).map(|s| Arc::clone(s.value())) else {
            break;
        };
        if !Arc::ptr_eq(&stream.subscription, subscription) {
            break;
        }

        stream.poll(chunk_size);
        let signalled = stream.signal.wait(interval);
        if subscription.stopped.load(Ordering::Acquire) {
            break;
        }

        if signalled {
            loop {
                let Some(record) = stream.framer.lock().next_record() else {
                    break;
                };
                if record.len() <= RECORD_DELIMITER.len() {
                    continue;
                }
                delivered += 1;
                if !on_line(&record) {
                    tracing::debug!(stream = key, delivered, "subscriber finished");
                    return;
                }
            }
        }

        if !on_line(&[]) {
            tracing::debug!(stream = key, delivered, "subscriber finished");
            return;
        }
    }
    tracing::debug!(stream = key, delivered, "tail stopped");
}
