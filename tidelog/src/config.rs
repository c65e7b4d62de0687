//! Engine and tailer configuration.
//!
//! Options are flat and deserialise from TOML; every key is optional:
//!
//! ```toml
//! dir = "/var/log/app"
//! level = "errors_only"
//! log_size = 268435456
//! buffer_size = 16384
//! interval_ms = 250
//! lock_retry = { bounded = 1000 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};
use crate::limits::{
    DEFAULT_BUFFER_SIZE, DEFAULT_INTERVAL_MS, DEFAULT_IO_WORKERS, DEFAULT_LOG_SIZE,
    DEFAULT_SPACE_MIN,
};
use crate::log_file::LockRetry;
use crate::record::LoggingLevel;

/// Name of the log directory created beside the executable by default.
pub const DEFAULT_DIR_NAME: &str = "Logs";

/// Configuration for [`LogEngine`](crate::LogEngine) and
/// [`LogTailer`](crate::LogTailer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Log directory. Defaults to `Logs` beside the running executable.
    pub dir: Option<PathBuf>,
    /// Which records are written.
    pub level: LoggingLevel,
    /// Free space (bytes) below which a warning is logged. Advisory only.
    pub space_min: u64,
    /// Size limit of one part in bytes.
    pub log_size: u64,
    /// Tailer read chunk in bytes. The framing ring holds twice this.
    pub buffer_size: usize,
    /// Tailer poll interval in milliseconds.
    pub interval_ms: u64,
    /// I/O worker threads per engine or tailer.
    pub io_workers: usize,
    /// Retry policy for byte-range locks.
    pub lock_retry: LockRetry,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: LoggingLevel::All,
            space_min: DEFAULT_SPACE_MIN,
            log_size: DEFAULT_LOG_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            interval_ms: DEFAULT_INTERVAL_MS,
            io_workers: DEFAULT_IO_WORKERS,
            lock_retry: LockRetry::Unbounded,
        }
    }
}

impl LogConfig {
    /// Creates a configuration with defaults and the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::default().with_dir(dir)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] if the text is not valid TOML or
    /// names an unknown key.
    pub fn from_toml_str(text: &str) -> LogResult<Self> {
        toml::from_str(text).map_err(|e| LogError::config(format!("invalid config: {e}")))
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> LogResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LogError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Sets the log directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Sets the logging level.
    #[must_use]
    pub const fn with_level(mut self, level: LoggingLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the advisory free space minimum.
    #[must_use]
    pub const fn with_space_min(mut self, bytes: u64) -> Self {
        self.space_min = bytes;
        self
    }

    /// Sets the part size limit.
    #[must_use]
    pub const fn with_log_size(mut self, bytes: u64) -> Self {
        self.log_size = bytes;
        self
    }

    /// Sets the tailer read chunk size.
    #[must_use]
    pub const fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Sets the tailer poll interval.
    #[must_use]
    pub const fn with_interval_ms(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    /// Sets the number of I/O worker threads.
    #[must_use]
    pub const fn with_io_workers(mut self, workers: usize) -> Self {
        self.io_workers = workers;
        self
    }

    /// Sets the byte-range lock retry policy.
    #[must_use]
    pub const fn with_lock_retry(mut self, lock_retry: LockRetry) -> Self {
        self.lock_retry = lock_retry;
        self
    }

    /// Returns the poll interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Checks that every option is usable.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] naming the first invalid option.
    pub fn validate(&self) -> LogResult<()> {
        if self.dir.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
            return Err(LogError::config("dir must not be empty"));
        }
        if self.log_size == 0 {
            return Err(LogError::config("log_size must be > 0"));
        }
        if self.buffer_size == 0 {
            return Err(LogError::config("buffer_size must be > 0"));
        }
        if self.buffer_size.checked_mul(2).is_none() {
            return Err(LogError::config("buffer_size is too large"));
        }
        if self.interval_ms == 0 {
            return Err(LogError::config("interval_ms must be > 0"));
        }
        if self.io_workers == 0 {
            return Err(LogError::config("io_workers must be > 0"));
        }
        if self.lock_retry == LockRetry::Bounded(0) {
            return Err(LogError::config("lock_retry bound must be > 0"));
        }
        Ok(())
    }

    /// Returns the absolute log directory.
    ///
    /// Relative directories resolve against the working directory. Without a
    /// configured directory this is `Logs` beside the running executable.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] if the directory cannot be resolved.
    pub fn resolve_dir(&self) -> LogResult<PathBuf> {
        match &self.dir {
            Some(dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(dir) => std::env::current_dir()
                .map(|cwd| cwd.join(dir))
                .map_err(|e| LogError::config(format!("cannot resolve {}: {e}", dir.display()))),
            None => {
                let exe = std::env::current_exe()
                    .map_err(|e| LogError::config(format!("cannot locate executable: {e}")))?;
                let parent = exe
                    .parent()
                    .ok_or_else(|| LogError::config("executable has no parent directory"))?;
                Ok(parent.join(DEFAULT_DIR_NAME))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, LoggingLevel::All);
        assert_eq!(config.log_size, 1 << 30);
        assert_eq!(config.buffer_size, 16 * 1024);
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.lock_retry, LockRetry::Unbounded);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = LogConfig::from_toml_str(
            r#"
            dir = "/var/log/app"
            level = "errors_only"
            log_size = 4096
            interval_ms = 50
            lock_retry = { bounded = 10 }
            "#,
        )
        .unwrap();

        assert_eq!(config.dir, Some(PathBuf::from("/var/log/app")));
        assert_eq!(config.level, LoggingLevel::ErrorsOnly);
        assert_eq!(config.log_size, 4096);
        assert_eq!(config.interval_ms, 50);
        assert_eq!(config.lock_retry, LockRetry::Bounded(10));
        // Unspecified keys keep their defaults.
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = LogConfig::from_toml_str("log_sise = 10").unwrap_err();
        assert!(matches!(err, LogError::Configuration { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tidelog.toml");
        std::fs::write(&path, "level = \"nothing\"\nlock_retry = \"unbounded\"\n").unwrap();

        let config = LogConfig::load(&path).unwrap();
        assert_eq!(config.level, LoggingLevel::Nothing);

        assert!(LogConfig::load(&temp_dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let base = LogConfig::new("/logs");
        assert!(base.clone().with_log_size(0).validate().is_err());
        assert!(base.clone().with_buffer_size(0).validate().is_err());
        assert!(base.clone().with_interval_ms(0).validate().is_err());
        assert!(base.clone().with_io_workers(0).validate().is_err());
        assert!(base.clone().with_lock_retry(LockRetry::Bounded(0)).validate().is_err());
        assert!(LogConfig::new("").validate().is_err());
        base.validate().unwrap();
    }

    #[test]
    fn test_resolve_dir() {
        assert_eq!(
            LogConfig::new("/abs/logs").resolve_dir().unwrap(),
            PathBuf::from("/abs/logs")
        );

        let relative = LogConfig::new("rel").resolve_dir().unwrap();
        assert!(relative.is_absolute());
        assert!(relative.ends_with("rel"));

        let default = LogConfig::default().resolve_dir().unwrap();
        assert!(default.ends_with(DEFAULT_DIR_NAME));
    }
}
