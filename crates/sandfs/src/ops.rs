//! Filesystem and file traits.
//!
//! Both backends implement the same contract so callers and tests can swap
//! one for the other. Paths are always relative to the backend's root.

use std::fmt;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::error::{FileSystemError, FsResult};
use crate::types::{DirEntry, FileInfo, FsType, OpenFlags};

/// An open file handle.
///
/// Once [`close`](File::close) has been called every other method fails
/// with [`FsError::FileClosed`](crate::FsError::FileClosed); closing again
/// is a no-op.
pub trait File: Read + Write + Seek + Send + fmt::Debug {
    /// Path the file was opened with, relative to the backend root.
    fn name(&self) -> &Path;

    /// Current metadata.
    fn stat(&self) -> FsResult<FileInfo>;

    /// Flush data to stable storage (no-op for memory).
    fn sync(&self) -> FsResult<()>;

    /// Resize to `size` bytes, zero-filling when growing.
    fn truncate(&self, size: u64) -> FsResult<()>;

    /// Change permission bits.
    fn chmod(&self, mode: u32) -> FsResult<()>;

    /// Change owner.
    fn chown(&self, uid: u32, gid: u32) -> FsResult<()>;

    /// Release the handle.
    fn close(&mut self) -> FsResult<()>;
}

/// Core filesystem operations.
///
/// Implemented by [`DiskFileSystem`](crate::DiskFileSystem) and
/// [`MemoryFileSystem`](crate::MemoryFileSystem).
pub trait FileSystem: Send + Sync + fmt::Debug {
    // ========================================================================
    // Identity
    // ========================================================================

    /// Which backend this is.
    fn fs_type(&self) -> FsType;

    /// Root every path is resolved against.
    fn root(&self) -> &Path;

    // ========================================================================
    // Directories
    // ========================================================================

    /// Create one directory. The parent must exist.
    fn mkdir(&self, path: &Path, perm: u32) -> FsResult<()>;

    /// Create a directory and any missing parents. Idempotent.
    fn mkdir_all(&self, path: &Path, perm: u32) -> FsResult<()>;

    /// Create a uniquely named directory inside `dir` (empty = root).
    ///
    /// Returns the new directory's path relative to the root.
    fn mkdir_temp(&self, dir: &Path, pattern: &str) -> FsResult<PathBuf>;

    /// Remove `path` and everything beneath it. Missing paths are not an error.
    fn remove_all(&self, path: &Path) -> FsResult<()>;

    /// Immediate children of a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>>;

    /// Virtual working directory. Always `/`.
    fn getwd(&self) -> FsResult<PathBuf>;

    /// Accepted for compatibility; does not change path resolution.
    fn chdir(&self, path: &Path) -> FsResult<()>;

    // ========================================================================
    // Files
    // ========================================================================

    /// Create or truncate a file for reading and writing.
    fn create(&self, path: &Path) -> FsResult<Box<dyn File>>;

    /// Create a uniquely named file inside `dir` (empty = root).
    fn create_temp(&self, dir: &Path, pattern: &str) -> FsResult<Box<dyn File>>;

    /// Open an existing file read-only.
    fn open(&self, path: &Path) -> FsResult<Box<dyn File>> {
        self.open_file(path, OpenFlags::read(), 0)
    }

    /// Open with explicit flags. `perm` applies only when the file is created.
    fn open_file(&self, path: &Path, flags: OpenFlags, perm: u32) -> FsResult<Box<dyn File>>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &Path) -> FsResult<()>;

    /// Move a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    // ========================================================================
    // Bulk I/O
    // ========================================================================

    /// Read a whole file.
    fn read_file(&self, path: &Path) -> FsResult<Vec<u8>>;

    /// Create or replace a file with `data`.
    fn write_file(&self, path: &Path, data: &[u8], perm: u32) -> FsResult<()>;

    // ========================================================================
    // Metadata and permissions
    // ========================================================================

    /// Metadata for a file or directory.
    fn stat(&self, path: &Path) -> FsResult<FileInfo>;

    /// True if `err` means the path does not exist.
    fn is_not_exist(&self, err: &FileSystemError) -> bool {
        err.is_not_exist()
    }

    /// Change permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Change owner.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> FsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}
