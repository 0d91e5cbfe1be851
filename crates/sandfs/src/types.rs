//! Core filesystem types.
//!
//! Metadata and directory entries are plain values shared by both
//! backends, so a caller comparing results across backends compares the
//! same shapes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

/// Default permissions for directories created implicitly.
pub const DEFAULT_DIR_PERM: u32 = 0o755;
/// Permissions for directories holding private data.
pub const PRIVATE_DIR_PERM: u32 = 0o750;
/// Default permissions for created files.
pub const DEFAULT_FILE_PERM: u32 = 0o644;
/// Permissions for private temporary data.
pub const PRIVATE_FILE_PERM: u32 = 0o600;
/// Permissions for temporary directories.
pub const TEMP_DIR_PERM: u32 = 0o700;

/// Backend selector.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FsType {
    /// Host filesystem, confined to a base directory.
    #[default]
    Disk,
    /// Maps in process memory.
    Memory,
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (disk backend only).
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File metadata, as returned by `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Base name of the entry.
    pub name: String,
    /// Size in bytes (0 for directories in the memory backend).
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permission bits (e.g., 0o644).
    pub perm: u32,
    /// Last modification time.
    pub mod_time: SystemTime,
    /// Owner user ID, if known.
    pub uid: Option<u32>,
    /// Owner group ID, if known.
    pub gid: Option<u32>,
}

impl FileInfo {
    /// Metadata for a regular file.
    pub fn file(name: impl Into<String>, size: u64, perm: u32, mod_time: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            kind: FileType::File,
            perm,
            mod_time,
            uid: None,
            gid: None,
        }
    }

    /// Metadata for a directory.
    pub fn directory(name: impl Into<String>, perm: u32, mod_time: SystemTime) -> Self {
        Self {
            name: name.into(),
            size: 0,
            kind: FileType::Directory,
            perm,
            mod_time,
            uid: None,
            gid: None,
        }
    }

    /// Set the owner.
    pub fn with_owner(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
    /// Metadata captured when the directory was read.
    pub info: FileInfo,
}

impl DirEntry {
    /// Build an entry from its metadata.
    pub fn from_info(info: FileInfo) -> Self {
        Self {
            name: info.name.clone(),
            kind: info.kind,
            info,
        }
    }

    /// Returns true if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Write-only access.
    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
            ..Default::default()
        }
    }

    /// Append to an existing file, creating it if needed.
    pub fn append() -> Self {
        Self {
            read: false,
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// True if writes are permitted.
    pub fn writable(&self) -> bool {
        self.write || self.append
    }

    /// Translate to `std::fs::OpenOptions`.
    pub(crate) fn to_std(self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        opts.read(self.read)
            .write(self.write)
            .append(self.append)
            .truncate(self.truncate);
        if self.exclusive {
            opts.create_new(true);
        } else {
            opts.create(self.create);
        }
        opts
    }
}

/// Base name of `path` as an owned string, `"/"` for the root.
pub(crate) fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}
