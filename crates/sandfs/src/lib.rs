//! # sandfs
//!
//! Sandboxed virtual filesystem with interchangeable backends.
//!
//! Key components:
//!
//! - [`FileSystem`] / [`File`] - Core traits every backend implements
//! - [`DiskFileSystem`] - Host filesystem confined to a base directory
//! - [`MemoryFileSystem`] - In-memory filesystem (for tests, scratch space)
//! - [`TempManager`] - Tracked scratch directories with aging and cleanup
//! - [`Factory`] - Builds a backend from a [`Config`]
//! - [`path`] - Validation, normalization and containment helpers
//!
//! ## Design Decisions
//!
//! - **Synchronous**: every operation runs on the caller's thread. Share a
//!   backend across threads as `Arc<dyn FileSystem>`.
//! - **Relative paths**: paths are relative to the backend root. `..` is
//!   always rejected; the disk backend also rejects absolute paths.
//! - **Errors wrapped once**: public methods return [`FileSystemError`]
//!   with the operation, path and a [`Severity`]. Classify with the
//!   `is_*_error` predicates, never by message text.
//! - **Unix only**: permissions, ownership and free-space queries use the
//!   POSIX APIs directly.

#[cfg(not(unix))]
compile_error!("sandfs supports unix targets only");

pub mod backends;
mod config;
mod error;
mod factory;
mod ops;
pub mod path;
mod temp;
mod types;

pub use backends::{DiskFile, DiskFileSystem, MemoryDir, MemoryFile, MemoryFileSystem};
pub use config::Config;
pub use error::{
    FileSystemError, FsError, FsResult, Severity, determine_severity, is_critical_error,
    is_not_exist_error, is_retryable_error, is_security_error, safe_operation,
};
pub use factory::Factory;
pub use ops::{File, FileSystem};
pub use temp::{TempDir, TempManager, TempStats};
pub use types::{
    DEFAULT_DIR_PERM, DEFAULT_FILE_PERM, DirEntry, FileInfo, FileType, FsType, OpenFlags,
    PRIVATE_DIR_PERM, PRIVATE_FILE_PERM, TEMP_DIR_PERM,
};
