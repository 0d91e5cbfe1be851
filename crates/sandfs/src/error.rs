//! Error types and classification.
//!
//! Every public filesystem method returns [`FsResult`]. The underlying
//! [`FsError`] is wrapped exactly once, at the method boundary, into a
//! [`FileSystemError`] carrying the operation name, the path, the backend
//! and a computed [`Severity`].
//!
//! Callers classify errors with [`is_security_error`], [`is_critical_error`],
//! [`is_retryable_error`] and [`is_not_exist_error`]. These walk the
//! `source()` chain and downcast; they never look at message text.

use std::any::Any;
use std::error::Error as StdError;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::types::FsType;

/// Filesystem error taxonomy.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path is empty, malformed, absolute where a relative path is required,
    /// or contains control characters.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Path tries to climb out of its root (security violation).
    #[error("path traversal attempt: {0}")]
    PathTraversal(String),

    /// The filesystem has been closed.
    #[error("filesystem is closed")]
    FileSystemClosed,

    /// The file handle has been closed.
    #[error("file is closed")]
    FileClosed,

    /// Write attempted on a handle opened without write access.
    #[error("file is read-only")]
    ReadOnlyFile,

    /// Operation is not supported by this backend or handle.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Caller lacks the rights for this operation (security violation).
    #[error("insufficient permissions: {0}")]
    InsufficientPermissions(String),

    /// No backend is registered under the requested name.
    #[error("filesystem type not found: {0}")]
    FileSystemNotFound(String),

    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Out of memory, disk space, or retry budget.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission bits forbid the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A bounded wait expired. Retryable.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Several independent failures from one sweep.
    #[error("{} operations failed: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<FileSystemError>),

    /// I/O error from the host OS.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

fn join_messages(errors: &[FileSystemError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl FsError {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl AsRef<Path>) -> Self {
        Self::InvalidPath(path.as_ref().display().to_string())
    }

    /// Create a PathTraversal error.
    pub fn path_traversal(path: impl AsRef<Path>) -> Self {
        Self::PathTraversal(path.as_ref().display().to_string())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl AsRef<Path>) -> Self {
        Self::NotFound(path.as_ref().display().to_string())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl AsRef<Path>) -> Self {
        Self::AlreadyExists(path.as_ref().display().to_string())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl AsRef<Path>) -> Self {
        Self::NotADirectory(path.as_ref().display().to_string())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl AsRef<Path>) -> Self {
        Self::IsADirectory(path.as_ref().display().to_string())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl AsRef<Path>) -> Self {
        Self::DirectoryNotEmpty(path.as_ref().display().to_string())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for "does not exist", whether sentinel or OS error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True for "already exists", whether sentinel or OS error.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }

    /// Security violations: traversal, insufficient permissions, invalid path.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::PathTraversal(_) | Self::InsufficientPermissions(_) | Self::InvalidPath(_)
        )
    }

    /// Closed filesystem or exhausted resources.
    pub fn is_critical(&self) -> bool {
        match self {
            Self::FileSystemClosed | Self::ResourceExhausted(_) => true,
            Self::Io(e) => is_exhaustion_kind(e.kind()),
            _ => false,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::InvalidPath(_) | Self::PathTraversal(_) | Self::InvalidConfig(_) => {
                io::ErrorKind::InvalidInput
            }
            Self::InsufficientPermissions(_) | Self::PermissionDenied(_) | Self::ReadOnlyFile => {
                io::ErrorKind::PermissionDenied
            }
            Self::NotFound(_) | Self::FileSystemNotFound(_) => io::ErrorKind::NotFound,
            Self::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            Self::NotADirectory(_) => io::ErrorKind::NotADirectory,
            Self::IsADirectory(_) => io::ErrorKind::IsADirectory,
            Self::DirectoryNotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            Self::UnsupportedOperation(_) => io::ErrorKind::Unsupported,
            Self::ResourceExhausted(_) => io::ErrorKind::OutOfMemory,
            Self::Timeout(_) => io::ErrorKind::TimedOut,
            Self::Io(e) => e.kind(),
            Self::FileSystemClosed
            | Self::FileClosed
            | Self::Aggregate(_)
            | Self::Other(_) => io::ErrorKind::Other,
        }
    }
}

fn is_exhaustion_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::OutOfMemory | io::ErrorKind::StorageFull)
}

/// Operational impact of an error, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Compute the severity of an error. `None` means success.
pub fn determine_severity(err: Option<&FsError>) -> Severity {
    let Some(err) = err else {
        return Severity::Info;
    };
    if let FsError::Aggregate(errors) = err {
        return errors
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::Info);
    }
    if err.is_critical() {
        Severity::Critical
    } else if err.is_security() {
        Severity::Error
    } else if err.is_not_found() || err.is_already_exists() {
        Severity::Warning
    } else {
        Severity::Error
    }
}

/// An [`FsError`] annotated with the operation that produced it.
#[derive(Debug, Error)]
#[error("{op} {}: {source}", path.display())]
pub struct FileSystemError {
    /// Operation name, e.g. `"open"`.
    pub op: &'static str,
    /// Path as supplied by the caller.
    pub path: PathBuf,
    /// Backend that raised the error, if any.
    pub fs_type: Option<FsType>,
    /// Severity computed from `source` at construction.
    pub severity: Severity,
    /// The underlying error.
    #[source]
    pub source: FsError,
}

impl FileSystemError {
    pub fn new(
        op: &'static str,
        path: impl Into<PathBuf>,
        fs_type: Option<FsType>,
        source: FsError,
    ) -> Self {
        let severity = determine_severity(Some(&source));
        Self {
            op,
            path: path.into(),
            fs_type,
            severity,
            source,
        }
    }

    /// The underlying error.
    pub fn kind(&self) -> &FsError {
        &self.source
    }

    /// Consume the wrapper and return the underlying error.
    pub fn into_inner(self) -> FsError {
        self.source
    }

    pub fn is_not_exist(&self) -> bool {
        self.source.is_not_found()
    }

    pub fn is_already_exists(&self) -> bool {
        self.source.is_already_exists()
    }
}

/// Result type for public filesystem operations.
pub type FsResult<T> = Result<T, FileSystemError>;

/// Wraps a low-level result with operation context.
pub(crate) trait OpContext<T> {
    fn context(self, op: &'static str, path: &Path, fs_type: Option<FsType>) -> FsResult<T>;
}

impl<T, E: Into<FsError>> OpContext<T> for Result<T, E> {
    fn context(self, op: &'static str, path: &Path, fs_type: Option<FsType>) -> FsResult<T> {
        self.map_err(|e| FileSystemError::new(op, path, fs_type, e.into()))
    }
}

/// Convert FsError to std::io::Error, keeping the original as the inner error.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Io(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}

impl From<FileSystemError> for io::Error {
    fn from(e: FileSystemError) -> Self {
        io::Error::new(e.source.io_kind(), e)
    }
}

/// Next error in the chain, looking through `io::Error` custom payloads
/// (whose own `source()` skips the payload itself).
fn next_in_chain<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a (dyn StdError + 'static)> {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if let Some(inner) = io_err.get_ref() {
            return Some(inner);
        }
    }
    err.source()
}

fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e| next_in_chain(*e))
}

fn io_kinds<'a>(err: &'a (dyn StdError + 'static)) -> impl Iterator<Item = io::ErrorKind> + 'a {
    chain(err).filter_map(|e| e.downcast_ref::<io::Error>().map(io::Error::kind))
}

fn fs_errors<'a>(err: &'a (dyn StdError + 'static)) -> impl Iterator<Item = &'a FsError> {
    chain(err).filter_map(|e| e.downcast_ref::<FsError>())
}

/// True if any error in the chain is a security violation.
pub fn is_security_error(err: &(dyn StdError + 'static)) -> bool {
    fs_errors(err).any(FsError::is_security)
}

/// True if any error in the chain is critical.
pub fn is_critical_error(err: &(dyn StdError + 'static)) -> bool {
    if let Some(wrapped) = err.downcast_ref::<FileSystemError>() {
        if wrapped.severity == Severity::Critical {
            return true;
        }
    }
    fs_errors(err).any(FsError::is_critical) || io_kinds(err).any(is_exhaustion_kind)
}

/// True if any error in the chain means "does not exist".
pub fn is_not_exist_error(err: &(dyn StdError + 'static)) -> bool {
    fs_errors(err).any(FsError::is_not_found)
        || io_kinds(err).any(|k| k == io::ErrorKind::NotFound)
}

/// Whether retrying the failed operation can succeed.
///
/// Critical and security errors are never retryable. Otherwise only an
/// explicit [`FsError::Timeout`] or an OS error of kind `TimedOut`,
/// `Interrupted` or `WouldBlock` qualifies.
pub fn is_retryable_error(err: &(dyn StdError + 'static)) -> bool {
    if is_critical_error(err) || is_security_error(err) {
        return false;
    }
    fs_errors(err).any(|e| matches!(e, FsError::Timeout(_)))
        || io_kinds(err).any(|k| {
            matches!(
                k,
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            )
        })
}

/// Run `f`, converting a panic into an error.
///
/// Not a control-flow mechanism: it keeps a bug in a callback from
/// unwinding through the filesystem boundary.
pub fn safe_operation<T>(op: &'static str, f: impl FnOnce() -> FsResult<T>) -> FsResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(op, "recovered panic: {}", msg);
            Err(FileSystemError::new(
                op,
                PathBuf::new(),
                None,
                FsError::Other(format!("panic in {op}: {msg}")),
            ))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
