//! Local filesystem storage.
//!
//! Reads and writes are positional (`pread`/`pwrite` on Unix, `seek_read`/
//! `seek_write` on Windows), so concurrent operations on one handle never
//! share a file cursor.
//!
//! Byte-range locks use open-file-description locks on Linux, which conflict
//! between separate opens of the same file even inside one process. Other
//! Unix targets use classic POSIX record locks (per process). Elsewhere range
//! locks always succeed.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::{Storage, StorageFile};
use crate::error::{LogError, LogResult};

/// Storage on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorage;

impl FileStorage {
    /// Creates a filesystem storage instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Storage for FileStorage {
    fn open(&self, path: &Path) -> LogResult<Arc<dyn StorageFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LogError::io("open", format!("{}: {e}", path.display())))?;

        Ok(Arc::new(LocalFile {
            file,
            path: path.to_path_buf(),
        }))
    }

    fn exists(&self, path: &Path) -> LogResult<bool> {
        path.try_exists().map_err(|e| LogError::io("exists", e))
    }

    fn list_files(&self, dir: &Path) -> LogResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| LogError::io("read_dir", e))? {
            let entry = entry.map_err(|e| LogError::io("read_dir_entry", e))?;
            if entry.file_type().is_ok_and(|t| t.is_file()) {
                files.push(entry.path());
            }
        }

        // Sort by filename for deterministic ordering.
        files.sort();
        Ok(files)
    }

    fn create_dir_all(&self, path: &Path) -> LogResult<()> {
        std::fs::create_dir_all(path).map_err(|e| LogError::io("create_dir_all", e))
    }
}

/// A file handle on the local filesystem.
#[derive(Debug)]
struct LocalFile {
    file: File,
    path: PathBuf,
}

impl StorageFile for LocalFile {
    fn write_at(&self, offset: u64, data: &[u8]) -> LogResult<usize> {
        write_all_at(&self.file, data, offset).map_err(|e| LogError::io("write", e))?;
        Ok(data.len())
    }

    fn read_at(&self, offset: u64, len: usize) -> LogResult<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            match read_at(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(LogError::io("read", e)),
            }
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    fn sync(&self) -> LogResult<()> {
        self.file
            .sync_data()
            .map_err(|e| LogError::io("sync", format!("{}: {e}", self.path.display())))
    }

    fn size(&self) -> LogResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| LogError::io("metadata", e))
    }

    fn try_lock_range(&self, offset: u64, len: u64) -> LogResult<bool> {
        range_lock::set(&self.file, offset, len, true)
    }

    fn unlock_range(&self, offset: u64, len: u64) -> LogResult<()> {
        range_lock::set(&self.file, offset, len, false).map(|_| ())
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, data, offset)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !data.is_empty() {
        match file.seek_write(data, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                data = &data[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
mod range_lock {
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg};
    use nix::libc;

    use crate::error::{LogError, LogResult};

    /// Takes (`lock = true`) or releases a write lock on a byte range without
    /// blocking. Returns `Ok(false)` on conflict.
    pub(super) fn set(file: &File, offset: u64, len: u64, lock: bool) -> LogResult<bool> {
        let to_off = |v: u64| {
            libc::off_t::try_from(v).map_err(|_| LogError::io("lock_range", "range exceeds off_t"))
        };

        #[allow(clippy::unnecessary_cast)]
        let l_type = if lock { libc::F_WRLCK } else { libc::F_UNLCK } as libc::c_short;
        #[allow(clippy::cast_possible_truncation)]
        let l_whence = libc::SEEK_SET as libc::c_short;

        let request = libc::flock {
            l_type,
            l_whence,
            l_start: to_off(offset)?,
            l_len: to_off(len)?,
            l_pid: 0,
        };

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let arg = FcntlArg::F_OFD_SETLK(&request);
        #[cfg(target_os = "macos")]
        let arg = FcntlArg::F_SETLK(&request);

        match fcntl(file.as_raw_fd(), arg) {
            Ok(_) => Ok(true),
            Err(Errno::EAGAIN | Errno::EACCES) => Ok(false),
            Err(e) => Err(LogError::io("lock_range", e)),
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
mod range_lock {
    use std::fs::File;

    use crate::error::LogResult;

    pub(super) fn set(_file: &File, offset: u64, len: u64, lock: bool) -> LogResult<bool> {
        tracing::trace!(offset, len, lock, "byte range locks are not enforced on this platform");
        Ok(true)
    }
}
