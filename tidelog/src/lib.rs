//! Tidelog - append-only text logging with size-based rotation and live tailing.
//!
//! This crate writes timestamped text records into named streams. Each
//! stream is a sequence of numbered part files (`<name>.000.log`,
//! `<name>.001.log`, ...) rotated by size. A tailer follows parts while
//! they grow and hands complete records to subscribers.
//!
//! # Architecture
//!
//! ```text
//!   LogEngine ──append──► AsyncLogFile ──reserve offset──► IoWorkerPool ──► Storage
//!                                                              │
//!   LogTailer ◄──records── LineFramer ◄──read completions──────┘
//! ```
//!
//! Writers reserve disjoint byte ranges with an atomic cursor, so concurrent
//! appends to one file never overlap and never take a lock on the hot path.
//! Blocking storage calls run on a small pool of I/O threads.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Explicit limits**: every size and interval has a named default in [`limits`]
//! - **No lost records on rotation**: a part closes only after its last in-flight write
//! - **Deterministic testing**: [`SimulatedStorage`] injects reproducible faults
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod engine;
mod error;
pub mod framing;
pub mod io_worker;
pub mod log_file;
pub mod naming;
pub mod record;
mod ring;
pub mod storage;
pub mod tailer;

pub use config::LogConfig;
pub use engine::LogEngine;
pub use error::{LogError, LogResult};
pub use framing::{LineFramer, RECORD_DELIMITER};
pub use io_worker::IoWorkerPool;
pub use log_file::{AsyncLogFile, Completion, LockRetry, Reservation};
pub use record::{LoggingLevel, Severity};
pub use ring::RingBuffer;
pub use storage::{FaultConfig, FaultStats, FileStorage, SimulatedStorage, Storage, StorageFile};
pub use tailer::LogTailer;

/// Default sizes, intervals and retry bounds.
pub mod limits {
    /// Unflushed bytes after which a completed write forces a sync (4 KB).
    pub const FLUSH_THRESHOLD_BYTES: u64 = 4096;

    /// Default part size limit in bytes (1 GB).
    pub const DEFAULT_LOG_SIZE: u64 = 1024 * 1024 * 1024;

    /// Default free space below which a warning is logged (1 GB).
    pub const DEFAULT_SPACE_MIN: u64 = 1024 * 1024 * 1024;

    /// Default tailer read chunk in bytes (16 KB).
    pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

    /// Default tailer poll interval in milliseconds.
    pub const DEFAULT_INTERVAL_MS: u64 = 1000;

    /// Default number of I/O worker threads.
    pub const DEFAULT_IO_WORKERS: usize = 2;

    /// Attempts to open the next part before an append fails.
    pub const ROTATION_OPEN_ATTEMPTS: u32 = 3;
}
