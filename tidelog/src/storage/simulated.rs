//! Simulated storage for deterministic testing.
//!
//! Files live in memory. Each file has a dirty image and a synced image;
//! [`SimulatedStorage::simulate_crash`] reverts every file to its synced
//! image. Faults are injected from a seeded counter-based hash, so a given
//! seed and operation order always produce the same faults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use super::{Storage, StorageFile};
use crate::error::{LogError, LogResult};

/// Handle id used for locks held by [`SimulatedStorage::hold_foreign_lock`].
const FOREIGN_HANDLE: u64 = u64::MAX;

/// Configuration for fault injection in simulated storage.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a write being torn (partial write). Range: 0.0 - 1.0.
    pub torn_write_rate: f64,
    /// Probability of a sync failing. Range: 0.0 - 1.0.
    pub sync_fail_rate: f64,
    /// Probability of a read failing. Range: 0.0 - 1.0.
    pub read_fail_rate: f64,
    /// Probability of a write failing. Range: 0.0 - 1.0.
    pub write_fail_rate: f64,
    /// Probability of `list_files` failing. Range: 0.0 - 1.0.
    pub list_files_fail_rate: f64,
    /// Probability of an open failing. Range: 0.0 - 1.0.
    pub open_fail_rate: f64,
    /// Number of upcoming opens that fail unconditionally.
    pub force_open_failures: u32,
    /// If set, the next write is torn after this many bytes.
    pub force_torn_write_at: Option<usize>,
    /// If true, the next sync fails.
    pub force_sync_fail: bool,
    /// If true, the next write fails with disk full.
    pub force_disk_full: bool,
}

impl FaultConfig {
    /// Creates a fault config with no faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a fault config that simulates a flaky disk.
    #[must_use]
    pub fn flaky() -> Self {
        Self {
            torn_write_rate: 0.01,
            sync_fail_rate: 0.005,
            read_fail_rate: 0.005,
            write_fail_rate: 0.005,
            list_files_fail_rate: 0.002,
            open_fail_rate: 0.002,
            ..Default::default()
        }
    }

    /// Sets the read fail rate.
    #[must_use]
    pub const fn with_read_fail_rate(mut self, rate: f64) -> Self {
        self.read_fail_rate = rate;
        self
    }

    /// Sets the write fail rate.
    #[must_use]
    pub const fn with_write_fail_rate(mut self, rate: f64) -> Self {
        self.write_fail_rate = rate;
        self
    }

    /// Sets the `list_files` fail rate.
    #[must_use]
    pub const fn with_list_files_fail_rate(mut self, rate: f64) -> Self {
        self.list_files_fail_rate = rate;
        self
    }

    /// Sets the open fail rate.
    #[must_use]
    pub const fn with_open_fail_rate(mut self, rate: f64) -> Self {
        self.open_fail_rate = rate;
        self
    }

    /// Sets the torn write rate.
    #[must_use]
    pub const fn with_torn_write_rate(mut self, rate: f64) -> Self {
        self.torn_write_rate = rate;
        self
    }

    /// Sets the sync fail rate.
    #[must_use]
    pub const fn with_sync_fail_rate(mut self, rate: f64) -> Self {
        self.sync_fail_rate = rate;
        self
    }

    /// Makes the next `count` opens fail.
    #[must_use]
    pub const fn with_force_open_failures(mut self, count: u32) -> Self {
        self.force_open_failures = count;
        self
    }

    /// Forces the next write to be torn after `len` bytes.
    #[must_use]
    pub const fn with_force_torn_write_at(mut self, len: usize) -> Self {
        self.force_torn_write_at = Some(len);
        self
    }

    /// Forces the next sync to fail.
    #[must_use]
    pub const fn with_force_sync_fail(mut self) -> Self {
        self.force_sync_fail = true;
        self
    }

    /// Forces the next write to fail with disk full.
    #[must_use]
    pub const fn with_force_disk_full(mut self) -> Self {
        self.force_disk_full = true;
        self
    }
}

/// Type of fault being injected.
#[derive(Debug, Clone, Copy)]
enum FaultType {
    TornWrite,
    SyncFail,
    ReadFail,
    WriteFail,
    ListFilesFail,
    OpenFail,
}

/// Statistics tracking for injected faults.
#[derive(Debug, Default, Clone)]
pub struct FaultStats {
    /// Number of torn writes injected.
    pub torn_writes: u64,
    /// Number of sync failures injected.
    pub sync_failures: u64,
    /// Number of read failures injected.
    pub read_failures: u64,
    /// Number of write failures injected (disk full included).
    pub write_failures: u64,
    /// Number of `list_files` failures injected.
    pub list_files_failures: u64,
    /// Number of open failures injected.
    pub open_failures: u64,
    /// Total storage operations attempted.
    pub total_ops: u64,
}

impl FaultStats {
    /// Returns the total number of faults injected.
    #[must_use]
    pub const fn total_faults(&self) -> u64 {
        self.torn_writes
            + self.sync_failures
            + self.read_failures
            + self.write_failures
            + self.list_files_failures
            + self.open_failures
    }
}

/// A byte range held by one handle.
#[derive(Debug, Clone, Copy)]
struct HeldRange {
    handle: u64,
    start: u64,
    end: u64,
}

impl HeldRange {
    const fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }
}

/// State shared by the storage and every handle it opened.
#[derive(Debug, Default)]
struct Shared {
    /// In-memory file contents (dirty, may not be synced).
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    /// Synced file contents (durable, survives a crash).
    synced_files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    locks: Mutex<HashMap<PathBuf, Vec<HeldRange>>>,
    fault_config: Mutex<FaultConfig>,
    fault_stats: Mutex<FaultStats>,
    op_counter: AtomicU64,
    next_handle: AtomicU64,
}

impl Shared {
    fn record_op(&self) {
        self.fault_stats.lock().total_ops += 1;
    }

    fn record_fault(&self, fault_type: FaultType) {
        let mut stats = self.fault_stats.lock();
        match fault_type {
            FaultType::TornWrite => stats.torn_writes += 1,
            FaultType::SyncFail => stats.sync_failures += 1,
            FaultType::ReadFail => stats.read_failures += 1,
            FaultType::WriteFail => stats.write_failures += 1,
            FaultType::ListFilesFail => stats.list_files_failures += 1,
            FaultType::OpenFail => stats.open_failures += 1,
        }
    }

    fn release_all(&self, path: &Path, handle: u64) {
        let mut locks = self.locks.lock();
        if let Some(held) = locks.get_mut(path) {
            held.retain(|r| r.handle != handle);
        }
    }
}

/// Deterministic RNG with a salt to decorrelate fault types.
#[allow(clippy::cast_precision_loss)]
fn should_inject_fault(seed: u64, rate: f64, counter: u64, salt: u64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    let multiplier = match salt {
        0 => 0x5851_f42d_4c95_7f2d, // writes
        1 => 0x9e37_79b9_7f4a_7c15, // syncs
        2 => 0xc6a4_a793_5bd1_e995, // reads
        _ => 0x5851_f42d_4c95_7f2d_u64.wrapping_add(salt),
    };
    let hash = seed.wrapping_add(counter).wrapping_mul(multiplier);
    let normalized = (hash as f64) / (u64::MAX as f64);
    normalized < rate
}

/// Zero length means "to end of file", as with POSIX record locks.
const fn range_end(offset: u64, len: u64) -> u64 {
    if len == 0 {
        u64::MAX
    } else {
        offset.saturating_add(len)
    }
}

fn sim_error(operation: &'static str, what: &str) -> LogError {
    LogError::io(operation, format!("{what} (simulated)"))
}

/// In-memory simulated storage for deterministic testing.
///
/// Clones share the same files, faults and statistics.
#[derive(Debug, Clone)]
pub struct SimulatedStorage {
    shared: Arc<Shared>,
    /// RNG seed for deterministic fault injection.
    seed: u64,
}

impl SimulatedStorage {
    /// Creates a new simulated storage with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, FaultConfig::default())
    }

    /// Creates a new simulated storage with fault injection enabled.
    #[must_use]
    pub fn with_faults(seed: u64, config: FaultConfig) -> Self {
        let shared = Shared {
            fault_config: Mutex::new(config),
            ..Shared::default()
        };
        Self {
            shared: Arc::new(shared),
            seed,
        }
    }

    /// Simulates a crash by reverting all files to their last synced state.
    /// Un-synced data is lost.
    pub fn simulate_crash(&self) {
        let synced = self.shared.synced_files.lock();
        self.shared.files.lock().clone_from(&synced);
    }

    /// Returns the fault configuration for modification.
    pub fn fault_config(&self) -> MutexGuard<'_, FaultConfig> {
        self.shared.fault_config.lock()
    }

    /// Returns a copy of the current fault statistics.
    #[must_use]
    pub fn fault_stats(&self) -> FaultStats {
        self.shared.fault_stats.lock().clone()
    }

    /// Gets the raw (dirty) file content for inspection in tests.
    #[must_use]
    pub fn get_raw_content(&self, path: &Path) -> Option<Vec<u8>> {
        self.shared.files.lock().get(path).cloned()
    }

    /// Gets the synced (durable) file content for inspection in tests.
    #[must_use]
    pub fn get_synced_content(&self, path: &Path) -> Option<Vec<u8>> {
        self.shared.synced_files.lock().get(path).cloned()
    }

    /// Sets raw file content directly, creating the file if needed.
    pub fn set_raw_content(&self, path: &Path, content: Vec<u8>) {
        self.shared.files.lock().insert(path.to_path_buf(), content);
    }

    /// Appends bytes to a file as another writer would.
    pub fn append_raw(&self, path: &Path, data: &[u8]) {
        self.shared
            .files
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(data);
    }

    /// Locks a byte range as if another process held it.
    pub fn hold_foreign_lock(&self, path: &Path, offset: u64, len: u64) {
        self.shared
            .locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .push(HeldRange {
                handle: FOREIGN_HANDLE,
                start: offset,
                end: range_end(offset, len),
            });
    }

    /// Releases every lock taken with [`hold_foreign_lock`](Self::hold_foreign_lock).
    pub fn release_foreign_locks(&self, path: &Path) {
        self.shared.release_all(path, FOREIGN_HANDLE);
    }

    fn check_fault(&self, rate: f64, fault_type: FaultType) -> bool {
        let counter = self.shared.op_counter.fetch_add(1, Ordering::Relaxed);
        if should_inject_fault(self.seed, rate, counter, 3) {
            self.shared.record_fault(fault_type);
            return true;
        }
        false
    }
}

impl Storage for SimulatedStorage {
    fn open(&self, path: &Path) -> LogResult<Arc<dyn StorageFile>> {
        self.shared.record_op();
        {
            let mut config = self.shared.fault_config.lock();
            if config.force_open_failures > 0 {
                config.force_open_failures -= 1;
                drop(config);
                self.shared.record_fault(FaultType::OpenFail);
                return Err(sim_error("open", "open failed"));
            }
            let rate = config.open_fail_rate;
            drop(config);
            if self.check_fault(rate, FaultType::OpenFail) {
                return Err(sim_error("open", "open failed"));
            }
        }

        self.shared
            .files
            .lock()
            .entry(path.to_path_buf())
            .or_default();

        Ok(Arc::new(SimulatedFile {
            path: path.to_path_buf(),
            shared: Arc::clone(&self.shared),
            seed: self.seed,
            handle: self.shared.next_handle.fetch_add(1, Ordering::Relaxed),
            write_counter: AtomicU64::new(0),
            sync_counter: AtomicU64::new(0),
            read_counter: AtomicU64::new(0),
        }))
    }

    fn exists(&self, path: &Path) -> LogResult<bool> {
        self.shared.record_op();
        Ok(self.shared.files.lock().contains_key(path))
    }

    fn list_files(&self, dir: &Path) -> LogResult<Vec<PathBuf>> {
        self.shared.record_op();
        let rate = self.shared.fault_config.lock().list_files_fail_rate;
        if self.check_fault(rate, FaultType::ListFilesFail) {
            return Err(sim_error("list_files", "list_files failed"));
        }

        let mut result: Vec<_> = self
            .shared
            .files
            .lock()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn create_dir_all(&self, _path: &Path) -> LogResult<()> {
        // Directories are implicit in simulated storage.
        Ok(())
    }
}

/// A handle to an open simulated file.
///
/// Uses separate counters per fault type so enabling one kind of fault does
/// not shift the pattern of another. Range locks held by a handle are
/// released when it is dropped.
#[derive(Debug)]
pub struct SimulatedFile {
    path: PathBuf,
    shared: Arc<Shared>,
    seed: u64,
    handle: u64,
    write_counter: AtomicU64,
    sync_counter: AtomicU64,
    read_counter: AtomicU64,
}

impl SimulatedFile {
    /// Returns the path this handle was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[allow(clippy::cast_possible_truncation)]
impl StorageFile for SimulatedFile {
    fn write_at(&self, offset: u64, data: &[u8]) -> LogResult<usize> {
        let counter = self.write_counter.fetch_add(1, Ordering::Relaxed);

        let mut config = self.shared.fault_config.lock();
        if should_inject_fault(self.seed, config.write_fail_rate, counter, 0) {
            drop(config);
            self.shared.record_fault(FaultType::WriteFail);
            return Err(sim_error("write", "write failed"));
        }
        if config.force_disk_full {
            config.force_disk_full = false;
            drop(config);
            self.shared.record_fault(FaultType::WriteFail);
            return Err(sim_error("write", "disk full"));
        }
        let torn_at = if let Some(len) = config.force_torn_write_at.take() {
            Some(len)
        } else if should_inject_fault(self.seed, config.torn_write_rate, counter, 0) {
            let hash = self
                .seed
                .wrapping_add(counter)
                .wrapping_mul(0x9e37_79b9_7f4a_7c15);
            Some(hash as usize % data.len().max(1))
        } else {
            None
        };
        drop(config);

        let start = offset as usize;
        let written = torn_at.map_or(data.len(), |len| len.min(data.len()));

        let mut files = self.shared.files.lock();
        let content = files.entry(self.path.clone()).or_default();
        if content.len() < start + written {
            content.resize(start + written, 0);
        }
        content[start..start + written].copy_from_slice(&data[..written]);
        drop(files);

        if torn_at.is_some() {
            self.shared.record_fault(FaultType::TornWrite);
            return Err(sim_error("write", "torn write"));
        }
        Ok(data.len())
    }

    fn read_at(&self, offset: u64, len: usize) -> LogResult<Bytes> {
        let counter = self.read_counter.fetch_add(1, Ordering::Relaxed);
        let rate = self.shared.fault_config.lock().read_fail_rate;
        if should_inject_fault(self.seed, rate, counter, 2) {
            self.shared.record_fault(FaultType::ReadFail);
            return Err(sim_error("read", "read failed"));
        }

        let files = self.shared.files.lock();
        let content = files
            .get(&self.path)
            .ok_or_else(|| LogError::io("read", "file not found"))?;

        let start = offset as usize;
        if start >= content.len() {
            return Ok(Bytes::new());
        }
        let end = content.len().min(start.saturating_add(len));
        Ok(Bytes::copy_from_slice(&content[start..end]))
    }

    fn sync(&self) -> LogResult<()> {
        let counter = self.sync_counter.fetch_add(1, Ordering::Relaxed);
        let mut config = self.shared.fault_config.lock();
        if config.force_sync_fail || should_inject_fault(self.seed, config.sync_fail_rate, counter, 1)
        {
            config.force_sync_fail = false;
            drop(config);
            self.shared.record_fault(FaultType::SyncFail);
            return Err(sim_error("sync", "sync failed"));
        }
        drop(config);

        let files = self.shared.files.lock();
        if let Some(content) = files.get(&self.path) {
            self.shared
                .synced_files
                .lock()
                .insert(self.path.clone(), content.clone());
        }
        Ok(())
    }

    fn size(&self) -> LogResult<u64> {
        self.shared
            .files
            .lock()
            .get(&self.path)
            .map(|c| c.len() as u64)
            .ok_or_else(|| LogError::io("size", "file not found"))
    }

    fn try_lock_range(&self, offset: u64, len: u64) -> LogResult<bool> {
        let end = range_end(offset, len);
        let mut locks = self.shared.locks.lock();
        let held = locks.entry(self.path.clone()).or_default();
        if held
            .iter()
            .any(|r| r.handle != self.handle && r.overlaps(offset, end))
        {
            return Ok(false);
        }
        held.push(HeldRange {
            handle: self.handle,
            start: offset,
            end,
        });
        Ok(true)
    }

    fn unlock_range(&self, offset: u64, len: u64) -> LogResult<()> {
        let end = range_end(offset, len);
        let mut locks = self.shared.locks.lock();
        if let Some(held) = locks.get_mut(&self.path) {
            held.retain(|r| !(r.handle == self.handle && r.start >= offset && r.end <= end));
        }
        Ok(())
    }
}

impl Drop for SimulatedFile {
    fn drop(&mut self) {
        self.shared.release_all(&self.path, self.handle);
    }
}
