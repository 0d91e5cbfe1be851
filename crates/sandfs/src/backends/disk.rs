//! Host filesystem backend.
//!
//! Provides access to real filesystem paths under a base directory, with
//! path security to prevent escaping it.

use std::fs::{self, DirBuilder, Metadata, OpenOptions, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{FileSystemError, FsError, FsResult, OpContext};
use crate::ops::{File, FileSystem};
use crate::path::{
    TEMP_NAME_ATTEMPTS, clean, ensure_dir, is_sub_path, normalize_path, temp_name, validate_path,
};
use crate::types::{
    DEFAULT_FILE_PERM, DirEntry, FileInfo, FileType, FsType, OpenFlags, PRIVATE_FILE_PERM,
    TEMP_DIR_PERM, entry_name,
};

const DISK: Option<FsType> = Some(FsType::Disk);

/// Host filesystem backend.
///
/// All operations are relative to `base_path`. For example, if the base is
/// `/srv/jobs/42`, then `read_file("out/log.txt")` reads
/// `/srv/jobs/42/out/log.txt`.
///
/// Paths must be relative and free of `..`. After joining, the nearest
/// existing ancestor is canonicalized so a symlink inside the base cannot
/// redirect an operation outside it.
///
/// `create` and `write_file` create missing parent directories;
/// `open_file` does not.
#[derive(Debug)]
pub struct DiskFileSystem {
    base_path: PathBuf,
    lock: RwLock<()>,
}

impl DiskFileSystem {
    /// Open a filesystem rooted at `base`, creating the directory if needed.
    ///
    /// The base is canonicalized once here (e.g. macOS `/tmp` becomes
    /// `/private/tmp`); every later containment check compares against it.
    #[tracing::instrument(skip_all, name = "disk.new", fields(base = %base.as_ref().display()))]
    pub fn new(base: impl AsRef<Path>) -> FsResult<Self> {
        let base = base.as_ref();
        Self::canonical_base(base)
            .map(|base_path| {
                tracing::debug!("disk filesystem rooted at {}", base_path.display());
                Self {
                    base_path,
                    lock: RwLock::new(()),
                }
            })
            .context("new", base, DISK)
    }

    fn canonical_base(base: &Path) -> Result<PathBuf, FsError> {
        if base.as_os_str().is_empty() {
            return Err(FsError::InvalidPath("empty base path".to_string()));
        }
        let base = normalize_path(base)?;
        ensure_dir(&base)?;
        Ok(dunce::canonicalize(&base)?)
    }

    /// Canonical base directory.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a caller path to a host path inside the base.
    ///
    /// Returns the lexical join, not the canonical form, so operations act
    /// on the entry the caller named (a symlink is removed, not its target).
    fn get_full_path(&self, path: &Path) -> Result<PathBuf, FsError> {
        validate_path(path)?;
        let full = clean(&self.base_path.join(path));
        if !is_sub_path(&self.base_path, &full)? {
            return Err(FsError::path_traversal(path));
        }

        let Some(existing) = full.ancestors().find(|a| a.symlink_metadata().is_ok()) else {
            return Err(FsError::not_found(&self.base_path));
        };
        let canonical = match dunce::canonicalize(existing) {
            Ok(canonical) => canonical,
            // Dangling symlink: the OS would follow it on create.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FsError::path_traversal(path));
            }
            Err(e) => return Err(e.into()),
        };
        if !canonical.starts_with(&self.base_path) {
            tracing::warn!(
                "blocked symlink escape: {} resolves to {}",
                path.display(),
                canonical.display()
            );
            return Err(FsError::path_traversal(path));
        }
        Ok(full)
    }

    /// Resolve a path naming an entry itself rather than what it points to.
    ///
    /// Only the parent has to resolve inside the base, so a symlink whose
    /// target lies outside can still be unlinked.
    fn get_entry_path(&self, path: &Path) -> Result<PathBuf, FsError> {
        validate_path(path)?;
        let full = clean(&self.base_path.join(path));
        if full == self.base_path || !is_sub_path(&self.base_path, &full)? {
            return self.get_full_path(path);
        }
        match (full.parent(), full.file_name()) {
            (Some(parent), Some(name)) => {
                Ok(self.get_dir_path(&self.relative(parent))?.join(name))
            }
            _ => self.get_full_path(path),
        }
    }

    /// Resolve a directory argument where empty means the base.
    fn get_dir_path(&self, dir: &Path) -> Result<PathBuf, FsError> {
        if dir.as_os_str().is_empty() {
            Ok(self.base_path.clone())
        } else {
            self.get_full_path(dir)
        }
    }

    fn relative(&self, full: &Path) -> PathBuf {
        full.strip_prefix(&self.base_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| full.to_path_buf())
    }

    fn ensure_parent(full: &Path) -> Result<(), FsError> {
        match full.parent() {
            Some(parent) => ensure_dir(parent),
            None => Ok(()),
        }
    }

    /// Convert std::fs::Metadata to FileInfo.
    fn metadata_to_info(name: String, meta: &Metadata) -> FileInfo {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };

        FileInfo {
            name,
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mod_time: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        }
    }

    fn open_with(&self, full: &Path, name: PathBuf, opts: &OpenOptions) -> Result<DiskFile, FsError> {
        let file = opts.open(full)?;
        Ok(DiskFile {
            name,
            file: Some(file),
        })
    }

    fn mkdir_inner(&self, path: &Path, perm: u32, recursive: bool) -> Result<(), FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.write();
        DirBuilder::new()
            .recursive(recursive)
            .mode(perm & 0o7777)
            .create(&full)?;
        Ok(())
    }

    fn mkdir_temp_inner(&self, dir: &Path, pattern: &str) -> Result<PathBuf, FsError> {
        let parent = self.get_dir_path(dir)?;
        let _guard = self.lock.write();
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let full = parent.join(temp_name(pattern)?);
            match DirBuilder::new().mode(TEMP_DIR_PERM).create(&full) {
                Ok(()) => return Ok(self.relative(&full)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(FsError::ResourceExhausted(format!(
            "no unique name for pattern {pattern}"
        )))
    }

    fn remove_all_inner(&self, path: &Path) -> Result<(), FsError> {
        let full = self.get_entry_path(path)?;
        let _guard = self.lock.write();
        if full == self.base_path {
            for entry in fs::read_dir(&full)? {
                remove_entry(&entry?.path())?;
            }
            return Ok(());
        }
        match remove_entry(&full) {
            Err(FsError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn read_dir_inner(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.read();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(DirEntry::from_info(Self::metadata_to_info(name, &meta)));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_inner(&self, path: &Path) -> Result<DiskFile, FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.write();
        Self::ensure_parent(&full)?;
        let mut opts = OpenFlags::create_truncate().to_std();
        opts.mode(DEFAULT_FILE_PERM);
        self.open_with(&full, path.to_path_buf(), &opts)
    }

    fn create_temp_inner(&self, dir: &Path, pattern: &str) -> Result<DiskFile, FsError> {
        let parent = self.get_dir_path(dir)?;
        let _guard = self.lock.write();
        let mut opts = OpenFlags::create_exclusive().to_std();
        opts.mode(PRIVATE_FILE_PERM);
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let full = parent.join(temp_name(pattern)?);
            match self.open_with(&full, self.relative(&full), &opts) {
                Err(FsError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                other => return other,
            }
        }
        Err(FsError::ResourceExhausted(format!(
            "no unique name for pattern {pattern}"
        )))
    }

    fn open_file_inner(&self, path: &Path, flags: OpenFlags, perm: u32) -> Result<DiskFile, FsError> {
        let full = self.get_full_path(path)?;
        let mut opts = flags.to_std();
        if perm != 0 {
            opts.mode(perm & 0o7777);
        }
        if flags.create {
            let _guard = self.lock.write();
            self.open_with(&full, path.to_path_buf(), &opts)
        } else {
            let _guard = self.lock.read();
            self.open_with(&full, path.to_path_buf(), &opts)
        }
    }

    fn remove_inner(&self, path: &Path) -> Result<(), FsError> {
        let full = self.get_entry_path(path)?;
        if full == self.base_path {
            return Err(FsError::PermissionDenied("cannot remove root".to_string()));
        }
        let _guard = self.lock.write();
        if fs::symlink_metadata(&full)?.is_dir() {
            fs::remove_dir(&full)?;
        } else {
            fs::remove_file(&full)?;
        }
        Ok(())
    }

    fn rename_inner(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let src = self.get_full_path(from)?;
        let dst = self.get_full_path(to)?;
        if src == self.base_path || dst == self.base_path {
            return Err(FsError::PermissionDenied("cannot rename root".to_string()));
        }
        let _guard = self.lock.write();
        fs::rename(&src, &dst)?;
        Ok(())
    }

    fn read_file_inner(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.read();
        Ok(fs::read(&full)?)
    }

    fn write_file_inner(&self, path: &Path, data: &[u8], perm: u32) -> Result<(), FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.write();
        Self::ensure_parent(&full)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(perm & 0o7777)
            .open(&full)?;
        file.write_all(data)?;
        Ok(())
    }

    fn stat_inner(&self, path: &Path) -> Result<FileInfo, FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.read();
        let meta = fs::metadata(&full)?;
        Ok(Self::metadata_to_info(entry_name(&full), &meta))
    }

    fn chmod_inner(&self, path: &Path, mode: u32) -> Result<(), FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.write();
        fs::set_permissions(&full, Permissions::from_mode(mode & 0o7777))?;
        Ok(())
    }

    fn chown_inner(&self, path: &Path, uid: u32, gid: u32) -> Result<(), FsError> {
        let full = self.get_full_path(path)?;
        let _guard = self.lock.write();
        std::os::unix::fs::chown(&full, Some(uid), Some(gid))?;
        Ok(())
    }
}

/// Remove a file, symlink or directory tree without following links.
fn remove_entry(path: &Path) -> Result<(), FsError> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

impl FileSystem for DiskFileSystem {
    fn fs_type(&self) -> FsType {
        FsType::Disk
    }

    fn root(&self) -> &Path {
        &self.base_path
    }

    fn mkdir(&self, path: &Path, perm: u32) -> FsResult<()> {
        self.mkdir_inner(path, perm, false).context("mkdir", path, DISK)
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> FsResult<()> {
        self.mkdir_inner(path, perm, true)
            .context("mkdir_all", path, DISK)
    }

    fn mkdir_temp(&self, dir: &Path, pattern: &str) -> FsResult<PathBuf> {
        self.mkdir_temp_inner(dir, pattern)
            .context("mkdir_temp", dir, DISK)
    }

    fn remove_all(&self, path: &Path) -> FsResult<()> {
        self.remove_all_inner(path).context("remove_all", path, DISK)
    }

    fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        self.read_dir_inner(path).context("read_dir", path, DISK)
    }

    fn getwd(&self) -> FsResult<PathBuf> {
        Ok(PathBuf::from("/"))
    }

    fn chdir(&self, path: &Path) -> FsResult<()> {
        self.get_full_path(path)
            .map(|_| ())
            .context("chdir", path, DISK)
    }

    fn create(&self, path: &Path) -> FsResult<Box<dyn File>> {
        self.create_inner(path)
            .map(|f| Box::new(f) as Box<dyn File>)
            .context("create", path, DISK)
    }

    fn create_temp(&self, dir: &Path, pattern: &str) -> FsResult<Box<dyn File>> {
        self.create_temp_inner(dir, pattern)
            .map(|f| Box::new(f) as Box<dyn File>)
            .context("create_temp", dir, DISK)
    }

    fn open_file(&self, path: &Path, flags: OpenFlags, perm: u32) -> FsResult<Box<dyn File>> {
        self.open_file_inner(path, flags, perm)
            .map(|f| Box::new(f) as Box<dyn File>)
            .context("open", path, DISK)
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        self.remove_inner(path).context("remove", path, DISK)
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.rename_inner(from, to).context("rename", from, DISK)
    }

    fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        self.read_file_inner(path).context("read_file", path, DISK)
    }

    fn write_file(&self, path: &Path, data: &[u8], perm: u32) -> FsResult<()> {
        self.write_file_inner(path, data, perm)
            .context("write_file", path, DISK)
    }

    fn stat(&self, path: &Path) -> FsResult<FileInfo> {
        self.stat_inner(path).context("stat", path, DISK)
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.chmod_inner(path, mode).context("chmod", path, DISK)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> FsResult<()> {
        self.chown_inner(path, uid, gid).context("chown", path, DISK)
    }
}

/// Open handle on a host file.
#[derive(Debug)]
pub struct DiskFile {
    name: PathBuf,
    file: Option<fs::File>,
}

impl DiskFile {
    fn handle(&self) -> Result<&fs::File, FsError> {
        self.file.as_ref().ok_or(FsError::FileClosed)
    }

    fn handle_io(&mut self, op: &'static str) -> io::Result<&mut fs::File> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(FileSystemError::new(op, self.name.clone(), DISK, FsError::FileClosed).into()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Read for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle_io("read")?.read(buf)
    }
}

impl Write for DiskFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle_io("write")?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle_io("flush")?.flush()
    }
}

impl Seek for DiskFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.handle_io("seek")?.seek(pos)
    }
}

impl File for DiskFile {
    fn name(&self) -> &Path {
        &self.name
    }

    fn stat(&self) -> FsResult<FileInfo> {
        self.handle()
            .and_then(|f| Ok(f.metadata()?))
            .map(|meta| DiskFileSystem::metadata_to_info(entry_name(&self.name), &meta))
            .context("stat", &self.name, DISK)
    }

    fn sync(&self) -> FsResult<()> {
        self.handle()
            .and_then(|f| Ok(f.sync_all()?))
            .context("sync", &self.name, DISK)
    }

    fn truncate(&self, size: u64) -> FsResult<()> {
        self.handle()
            .and_then(|f| Ok(f.set_len(size)?))
            .context("truncate", &self.name, DISK)
    }

    fn chmod(&self, mode: u32) -> FsResult<()> {
        self.handle()
            .and_then(|f| Ok(f.set_permissions(Permissions::from_mode(mode & 0o7777))?))
            .context("chmod", &self.name, DISK)
    }

    fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        self.handle()
            .and_then(|f| Ok(std::os::unix::fs::fchown(f, Some(uid), Some(gid))?))
            .context("chown", &self.name, DISK)
    }

    fn close(&mut self) -> FsResult<()> {
        self.file = None;
        Ok(())
    }
}
