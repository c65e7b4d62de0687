//! Log engine error types.
//!
//! All errors are explicit and typed. Failures that happen on an I/O worker
//! thread reach the caller through a completion; the rest are returned
//! directly.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for log engine operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while writing, rotating or tailing logs.
#[derive(Debug, Clone, Error)]
pub enum LogError {
    /// I/O error from the underlying storage.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// A cursor would overflow while reserving a byte range.
    #[error("offset exhausted: reserving {len} bytes at offset {offset} overflows the cursor")]
    OffsetExhausted {
        /// Cursor value at the time of the reservation.
        offset: u64,
        /// Requested length.
        len: u64,
    },

    /// A record outgrew the framing buffer before its delimiter arrived.
    #[error("framing overflow: record exceeds buffer capacity {capacity}, dropped {dropped} bytes")]
    FramingOverflow {
        /// Capacity of the framing buffer in bytes.
        capacity: usize,
        /// Bytes discarded while resynchronising on the next delimiter.
        dropped: u64,
    },

    /// Invalid configuration.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The log file was already closed.
    #[error("log file closed: {}", path.display())]
    Closed {
        /// Path of the closed file.
        path: PathBuf,
    },

    /// Rotation could not open a new part; the record was not written.
    #[error("rotation of stream '{stream}' failed after {attempts} attempts: {message}")]
    Rotation {
        /// Logical stream name.
        stream: String,
        /// Number of part numbers tried.
        attempts: u32,
        /// Last open error.
        message: String,
    },

    /// A bounded byte-range lock retry gave up.
    #[error("byte range lock contended: [{offset}, {offset}+{len}) after {attempts} attempts")]
    LockContended {
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        len: u64,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The I/O worker pool has shut down.
    #[error("I/O worker stopped")]
    WorkerStopped,
}

impl LogError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }

    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Contention and transient I/O failures are retryable; exhausted cursors,
    /// closed files and configuration errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::LockContended { .. } | Self::Rotation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LogError::OffsetExhausted {
            offset: u64::MAX - 1,
            len: 16,
        };
        let msg = format!("{err}");
        assert!(msg.contains("16 bytes"));
        assert!(msg.contains(&(u64::MAX - 1).to_string()));

        let err = LogError::Closed {
            path: PathBuf::from("/tmp/out.000.log"),
        };
        assert!(format!("{err}").contains("out.000.log"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(LogError::io("write", "disk busy").is_retryable());
        assert!(LogError::LockContended {
            offset: 0,
            len: 1,
            attempts: 3
        }
        .is_retryable());

        assert!(!LogError::WorkerStopped.is_retryable());
        assert!(!LogError::config("bad").is_retryable());
        assert!(!LogError::OffsetExhausted { offset: 0, len: 0 }.is_retryable());
    }
}
