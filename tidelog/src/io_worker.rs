//! Completion-based I/O worker pool.
//!
//! Callers never block on storage. They submit a command carrying a
//! continuation, and a worker thread performs the blocking storage call and
//! invokes the continuation with the outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐  ┌──────────┐
//! │ producer │  │ producer │  │  tailer  │
//! └────┬─────┘  └────┬─────┘  └────┬─────┘
//!      └─────────────┼─────────────┘
//!                    │ route % workers
//!         ┌──────────┴──────────┐
//!         ▼ mpsc                ▼ mpsc
//! ┌───────────────┐     ┌───────────────┐
//! │ tidelog-io-0  │     │ tidelog-io-1  │
//! │ batch drain,  │     │ batch drain,  │
//! │ continuations │     │ continuations │
//! └───────────────┘     └───────────────┘
//! ```
//!
//! Every file is routed to one worker by its route id, so operations on one
//! file run in the order they were submitted. Closing a file is queued like
//! any other command and therefore runs after everything submitted before it.
//!
//! The pool is cheaply cloneable. Workers drain their queues and stop when
//! the last clone is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{LogError, LogResult};
use crate::storage::StorageFile;

/// Continuation for a write. Receives the bytes written.
pub type WriteCallback = Box<dyn FnOnce(LogResult<usize>) + Send>;
/// Continuation for a read. Receives the bytes read (empty at end of file).
pub type ReadCallback = Box<dyn FnOnce(LogResult<Bytes>) + Send>;
/// Continuation for a sync or close.
pub type SyncCallback = Box<dyn FnOnce(LogResult<()>) + Send>;

/// Maximum number of commands drained per batch.
const MAX_BATCH_SIZE: usize = 64;

/// Commands sent to a worker thread.
enum IoCommand {
    Write {
        file: Arc<dyn StorageFile>,
        offset: u64,
        data: Bytes,
        on_complete: WriteCallback,
    },
    Read {
        file: Arc<dyn StorageFile>,
        offset: u64,
        len: usize,
        on_complete: ReadCallback,
    },
    Sync {
        file: Arc<dyn StorageFile>,
        on_complete: SyncCallback,
    },
    /// Syncs, then drops the worker's reference to the handle.
    Close {
        file: Arc<dyn StorageFile>,
        on_complete: SyncCallback,
    },
    Shutdown,
}

impl IoCommand {
    /// Runs the command on the current thread.
    fn execute(self) {
        match self {
            Self::Write {
                file,
                offset,
                data,
                on_complete,
            } => {
                let result = file.write_at(offset, &data);
                if let Err(e) = &result {
                    tracing::warn!(offset, len = data.len(), error = %e, "write failed");
                }
                on_complete(result);
            }
            Self::Read {
                file,
                offset,
                len,
                on_complete,
            } => {
                let result = file.read_at(offset, len);
                if let Err(e) = &result {
                    tracing::warn!(offset, len, error = %e, "read failed");
                }
                on_complete(result);
            }
            Self::Sync { file, on_complete } => on_complete(file.sync()),
            Self::Close { file, on_complete } => {
                let result = file.sync();
                drop(file);
                on_complete(result);
            }
            Self::Shutdown => {}
        }
    }

    /// Completes the command with `err` without running it.
    fn fail(self, err: LogError) {
        match self {
            Self::Write { on_complete, .. } => on_complete(Err(err)),
            Self::Read { on_complete, .. } => on_complete(Err(err)),
            Self::Sync { on_complete, .. } | Self::Close { on_complete, .. } => {
                on_complete(Err(err));
            }
            Self::Shutdown => {}
        }
    }
}

/// State for a single worker.
struct Worker {
    command_tx: mpsc::UnboundedSender<IoCommand>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Shared state for the worker pool.
struct PoolState {
    workers: Vec<Worker>,
    next_route: AtomicU64,
}

impl Drop for PoolState {
    fn drop(&mut self) {
        let current = std::thread::current().id();
        for (i, worker) in self.workers.iter().enumerate() {
            let _ = worker.command_tx.send(IoCommand::Shutdown);

            // The last reference can be released by a continuation running on
            // a worker; that worker exits on its own after the shutdown command.
            if worker.thread_id == current {
                continue;
            }
            if let Some(handle) = worker.handle.lock().take() {
                if handle.join().is_err() {
                    tracing::warn!(worker = i, "I/O worker thread panicked");
                }
            }
        }
    }
}

/// Pool of I/O worker threads.
#[derive(Clone)]
pub struct IoWorkerPool {
    state: Arc<PoolState>,
}

impl std::fmt::Debug for IoWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoWorkerPool")
            .field("workers", &self.state.workers.len())
            .finish_non_exhaustive()
    }
}

impl IoWorkerPool {
    /// Starts a pool with `worker_count` threads.
    ///
    /// # Errors
    /// Returns an error if `worker_count` is zero or a thread cannot be spawned.
    pub fn new(worker_count: usize) -> LogResult<Self> {
        if worker_count == 0 {
            return Err(LogError::config("io_workers must be > 0"));
        }

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let handle = std::thread::Builder::new()
                .name(format!("tidelog-io-{i}"))
                .spawn(move || worker_loop(i, command_rx))
                .map_err(|e| LogError::io("spawn_worker", e))?;

            workers.push(Worker {
                command_tx,
                thread_id: handle.thread().id(),
                handle: Mutex::new(Some(handle)),
            });
        }

        tracing::info!(worker_count, "I/O worker pool started");

        Ok(Self {
            state: Arc::new(PoolState {
                workers,
                next_route: AtomicU64::new(0),
            }),
        })
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.state.workers.len()
    }

    /// Allocates a route id. Commands with the same route run on one worker
    /// in submission order.
    pub fn alloc_route(&self) -> u64 {
        self.state.next_route.fetch_add(1, Ordering::Relaxed)
    }

    /// Submits a positional write.
    pub fn write(
        &self,
        route: u64,
        file: Arc<dyn StorageFile>,
        offset: u64,
        data: Bytes,
        on_complete: WriteCallback,
    ) {
        self.submit(
            route,
            IoCommand::Write {
                file,
                offset,
                data,
                on_complete,
            },
        );
    }

    /// Submits a positional read.
    pub fn read(
        &self,
        route: u64,
        file: Arc<dyn StorageFile>,
        offset: u64,
        len: usize,
        on_complete: ReadCallback,
    ) {
        self.submit(
            route,
            IoCommand::Read {
                file,
                offset,
                len,
                on_complete,
            },
        );
    }

    /// Submits a sync.
    pub fn sync(&self, route: u64, file: Arc<dyn StorageFile>, on_complete: SyncCallback) {
        self.submit(route, IoCommand::Sync { file, on_complete });
    }

    /// Submits a close. Runs after every command previously submitted on `route`.
    pub fn close(&self, route: u64, file: Arc<dyn StorageFile>, on_complete: SyncCallback) {
        self.submit(route, IoCommand::Close { file, on_complete });
    }

    #[allow(clippy::cast_possible_truncation)]
    fn submit(&self, route: u64, command: IoCommand) {
        let idx = (route % self.state.workers.len() as u64) as usize;
        if let Err(mpsc::error::SendError(command)) = self.state.workers[idx].command_tx.send(command)
        {
            command.fail(LogError::WorkerStopped);
        }
    }
}

/// Drains commands in batches until shutdown or until every sender is gone.
fn worker_loop(index: usize, mut command_rx: mpsc::UnboundedReceiver<IoCommand>) {
    let mut batch: Vec<IoCommand> = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut total_batches = 0u64;
    let mut total_ops = 0u64;
    let mut max_batch_size = 0usize;
    let mut shutdown = false;

    while !shutdown {
        // Wait for at least one command.
        let Some(first) = command_rx.blocking_recv() else {
            break;
        };
        if matches!(first, IoCommand::Shutdown) {
            break;
        }
        batch.push(first);

        // Drain additional pending commands (non-blocking).
        while batch.len() < MAX_BATCH_SIZE {
            match command_rx.try_recv() {
                Ok(IoCommand::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Ok(command) => batch.push(command),
                Err(_) => break,
            }
        }

        let count = batch.len();
        tracing::debug!(worker = index, count, "processing I/O batch");
        for command in batch.drain(..) {
            command.execute();
        }

        total_batches += 1;
        total_ops += count as u64;
        max_batch_size = max_batch_size.max(count);
    }

    // Anything still queued behind the shutdown is completed as stopped.
    command_rx.close();
    while let Ok(command) = command_rx.try_recv() {
        command.fail(LogError::WorkerStopped);
    }

    tracing::debug!(
        worker = index,
        total_batches,
        total_ops,
        max_batch_size,
        "I/O worker stopped"
    );
}
