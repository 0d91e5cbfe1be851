//! In-memory filesystem backend.
//!
//! Used for tests and scratch space. All data is lost when dropped or
//! closed.
//!
//! Two maps hold the namespace: `files` and `dirs`, keyed by absolute
//! virtual path under the root. A path lives in at most one of them, and
//! every file's parent directory is always present in `dirs`.
//!
//! `create`, `open_file` with `create`, and `write_file` materialize missing
//! parent directories. The disk backend does not do this for `open_file`,
//! so callers that need identical behavior should `mkdir_all` first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::memory_file::{FileData, FileNode, MemoryFile};
use crate::error::{FsError, FsResult, OpContext};
use crate::ops::{File, FileSystem};
use crate::path::{TEMP_NAME_ATTEMPTS, clean, temp_name, validate_path};
use crate::types::{
    DEFAULT_DIR_PERM, DEFAULT_FILE_PERM, DirEntry, FileInfo, FsType, OpenFlags,
    PRIVATE_FILE_PERM, TEMP_DIR_PERM, entry_name,
};

const MEMORY: Option<FsType> = Some(FsType::Memory);

/// Directory metadata.
#[derive(Debug, Clone)]
pub struct MemoryDir {
    name: String,
    perm: u32,
    mod_time: SystemTime,
    parent: PathBuf,
    uid: Option<u32>,
    gid: Option<u32>,
}

impl MemoryDir {
    fn new(path: &Path, perm: u32) -> Self {
        Self {
            name: entry_name(path),
            perm,
            mod_time: SystemTime::now(),
            parent: path.parent().unwrap_or(path).to_path_buf(),
            uid: None,
            gid: None,
        }
    }

    /// Base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute virtual path of the parent directory.
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    fn info(&self) -> FileInfo {
        FileInfo::directory(self.name.clone(), self.perm, self.mod_time)
            .with_owner(self.uid, self.gid)
    }
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<PathBuf, FileNode>,
    dirs: HashMap<PathBuf, MemoryDir>,
    closed: bool,
}

impl State {
    fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains_key(path)
    }

    fn is_dir_empty(&self, path: &Path) -> bool {
        !self.files.keys().any(|k| k.parent() == Some(path))
            && !self
                .dirs
                .keys()
                .any(|k| k.as_path() != path && k.parent() == Some(path))
    }

    /// Fail unless `path` is an existing directory.
    fn require_dir(&self, path: &Path) -> Result<(), FsError> {
        if self.dirs.contains_key(path) {
            Ok(())
        } else if self.files.contains_key(path) {
            Err(FsError::not_a_directory(path))
        } else {
            Err(FsError::not_found(path))
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe: one `RwLock` guards the namespace maps, and each file's
/// content has its own lock, so I/O on open handles never waits on
/// directory operations.
#[derive(Debug)]
pub struct MemoryFileSystem {
    root: PathBuf,
    state: RwLock<State>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new("")
    }
}

impl MemoryFileSystem {
    /// Create an empty filesystem. An empty `root` means `/`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = clean(&Path::new("/").join(root.as_ref()));
        let mut state = State::default();
        state
            .dirs
            .insert(root.clone(), MemoryDir::new(&root, DEFAULT_DIR_PERM));
        tracing::debug!("memory filesystem created at {}", root.display());
        Self {
            root,
            state: RwLock::new(state),
        }
    }

    /// Drop all content. Every later operation fails with
    /// [`FsError::FileSystemClosed`]. Closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.state.write();
        if !state.closed {
            state.closed = true;
            state.files.clear();
            state.dirs.clear();
            tracing::debug!("memory filesystem at {} closed", self.root.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Stored metadata of a directory, including its parent path.
    pub fn dir_metadata(&self, path: &Path) -> FsResult<MemoryDir> {
        self.resolve(path)
            .and_then(|full| {
                let state = self.read_state()?;
                state
                    .dirs
                    .get(&full)
                    .cloned()
                    .ok_or_else(|| FsError::not_found(path))
            })
            .context("dir_metadata", path, MEMORY)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>, FsError> {
        let state = self.state.read();
        if state.closed {
            return Err(FsError::FileSystemClosed);
        }
        Ok(state)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>, FsError> {
        let state = self.state.write();
        if state.closed {
            return Err(FsError::FileSystemClosed);
        }
        Ok(state)
    }

    /// Map a caller path onto the virtual namespace.
    ///
    /// A leading `/` is taken relative to the root; `..` is rejected.
    fn resolve(&self, path: &Path) -> Result<PathBuf, FsError> {
        let rel = path.strip_prefix("/").unwrap_or(path);
        if rel.as_os_str().is_empty() && !path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }
        validate_path(rel)?;
        Ok(clean(&self.root.join(rel)))
    }

    /// Resolve a directory argument where empty means the root.
    fn resolve_dir(&self, dir: &Path) -> Result<PathBuf, FsError> {
        if dir.as_os_str().is_empty() {
            Ok(self.root.clone())
        } else {
            self.resolve(dir)
        }
    }

    fn relative(&self, full: &Path) -> PathBuf {
        match full.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => full.to_path_buf(),
        }
    }

    /// Create `path` and every missing ancestor below the root.
    fn mkdir_all_locked(&self, state: &mut State, path: &Path, perm: u32) -> Result<(), FsError> {
        let mut chain: Vec<&Path> = path
            .ancestors()
            .take_while(|a| a.starts_with(&self.root))
            .collect();
        chain.reverse();
        for dir in chain {
            if state.files.contains_key(dir) {
                return Err(FsError::not_a_directory(self.relative(dir)));
            }
            if !state.dirs.contains_key(dir) {
                state.dirs.insert(dir.to_path_buf(), MemoryDir::new(dir, perm));
            }
        }
        Ok(())
    }

    fn open_locked(
        &self,
        state: &mut State,
        full: &Path,
        name: PathBuf,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<MemoryFile, FsError> {
        if state.dirs.contains_key(full) {
            return Err(FsError::is_a_directory(&name));
        }

        if let Some(node) = state.files.get(full) {
            if flags.create && flags.exclusive {
                return Err(FsError::already_exists(&name));
            }
            if flags.truncate && flags.writable() {
                let mut data = node.write();
                data.bytes.clear();
                data.mod_time = SystemTime::now();
            }
            return Ok(MemoryFile::new(name, Arc::clone(node), flags));
        }

        if !flags.create {
            return Err(FsError::not_found(&name));
        }
        if let Some(parent) = full.parent() {
            self.mkdir_all_locked(state, parent, DEFAULT_DIR_PERM)?;
        }
        let node: FileNode = Arc::new(RwLock::new(FileData::new(perm & 0o7777)));
        state.files.insert(full.to_path_buf(), Arc::clone(&node));
        Ok(MemoryFile::new(name, node, flags))
    }

    /// Re-key every entry at or below `from` to live under `to`.
    fn update_paths_after_rename(state: &mut State, from: &Path, to: &Path) {
        let moved_path = |old: &Path| -> PathBuf {
            match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => old.to_path_buf(),
            }
        };

        let dir_keys: Vec<PathBuf> = state
            .dirs
            .keys()
            .filter(|k| k.starts_with(from))
            .cloned()
            .collect();
        for old in dir_keys {
            if let Some(mut dir) = state.dirs.remove(&old) {
                let new = moved_path(&old);
                dir.name = entry_name(&new);
                dir.parent = new.parent().unwrap_or(&new).to_path_buf();
                state.dirs.insert(new, dir);
            }
        }

        let file_keys: Vec<PathBuf> = state
            .files
            .keys()
            .filter(|k| k.starts_with(from))
            .cloned()
            .collect();
        for old in file_keys {
            if let Some(node) = state.files.remove(&old) {
                state.files.insert(moved_path(&old), node);
            }
        }
    }

    fn mkdir_inner(&self, path: &Path, perm: u32) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        let mut state = self.write_state()?;
        if state.contains(&full) {
            return Err(FsError::already_exists(path));
        }
        let parent = full.parent().unwrap_or(self.root.as_path());
        state.require_dir(parent)?;
        state
            .dirs
            .insert(full.clone(), MemoryDir::new(&full, perm & 0o7777));
        Ok(())
    }

    fn mkdir_all_inner(&self, path: &Path, perm: u32) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        let mut state = self.write_state()?;
        self.mkdir_all_locked(&mut state, &full, perm & 0o7777)
    }

    fn mkdir_temp_inner(&self, dir: &Path, pattern: &str) -> Result<PathBuf, FsError> {
        let parent = self.resolve_dir(dir)?;
        let mut state = self.write_state()?;
        state.require_dir(&parent)?;
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let full = parent.join(temp_name(pattern)?);
            if !state.contains(&full) {
                state
                    .dirs
                    .insert(full.clone(), MemoryDir::new(&full, TEMP_DIR_PERM));
                return Ok(self.relative(&full));
            }
        }
        Err(FsError::ResourceExhausted(format!(
            "no unique name for pattern {pattern}"
        )))
    }

    fn remove_all_inner(&self, path: &Path) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        let mut state = self.write_state()?;
        let keep_root = full == self.root;
        state.files.retain(|k, _| !k.starts_with(&full));
        state
            .dirs
            .retain(|k, _| !k.starts_with(&full) || (keep_root && *k == full));
        tracing::debug!("memory remove_all {}", full.display());
        Ok(())
    }

    fn read_dir_inner(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let full = self.resolve(path)?;
        let state = self.read_state()?;
        state.require_dir(&full)?;

        let mut entries: Vec<DirEntry> = state
            .dirs
            .iter()
            .filter(|(k, _)| k.as_path() != full.as_path() && k.parent() == Some(full.as_path()))
            .map(|(_, dir)| DirEntry::from_info(dir.info()))
            .collect();
        entries.extend(
            state
                .files
                .iter()
                .filter(|(k, _)| k.parent() == Some(full.as_path()))
                .map(|(k, node)| DirEntry::from_info(node.read().info(k))),
        );
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn chdir_inner(&self, path: &Path) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        self.read_state()?.require_dir(&full)
    }

    fn create_temp_inner(&self, dir: &Path, pattern: &str) -> Result<MemoryFile, FsError> {
        let parent = self.resolve_dir(dir)?;
        let mut state = self.write_state()?;
        state.require_dir(&parent)?;
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let full = parent.join(temp_name(pattern)?);
            if state.contains(&full) {
                continue;
            }
            let name = self.relative(&full);
            return self.open_locked(
                &mut state,
                &full,
                name,
                OpenFlags::create_exclusive(),
                PRIVATE_FILE_PERM,
            );
        }
        Err(FsError::ResourceExhausted(format!(
            "no unique name for pattern {pattern}"
        )))
    }

    fn open_file_inner(
        &self,
        path: &Path,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<MemoryFile, FsError> {
        let full = self.resolve(path)?;
        let mut state = self.write_state()?;
        self.open_locked(&mut state, &full, path.to_path_buf(), flags, perm)
    }

    fn remove_inner(&self, path: &Path) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(FsError::PermissionDenied("cannot remove root".to_string()));
        }
        let mut state = self.write_state()?;
        if state.files.remove(&full).is_some() {
            return Ok(());
        }
        if !state.dirs.contains_key(&full) {
            return Err(FsError::not_found(path));
        }
        if !state.is_dir_empty(&full) {
            return Err(FsError::directory_not_empty(path));
        }
        state.dirs.remove(&full);
        Ok(())
    }

    fn rename_inner(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if src == self.root || dst == self.root {
            return Err(FsError::PermissionDenied("cannot rename root".to_string()));
        }

        let mut state = self.write_state()?;
        let src_is_dir = if state.dirs.contains_key(&src) {
            true
        } else if state.files.contains_key(&src) {
            false
        } else {
            return Err(FsError::not_found(from));
        };
        if src == dst {
            return Ok(());
        }

        let dst_parent = dst.parent().unwrap_or(self.root.as_path());
        state.require_dir(dst_parent)?;

        if src_is_dir {
            if dst.starts_with(&src) {
                return Err(FsError::InvalidPath(format!(
                    "cannot move {} into itself",
                    from.display()
                )));
            }
            if state.files.contains_key(&dst) {
                return Err(FsError::not_a_directory(to));
            }
            if state.dirs.contains_key(&dst) {
                if !state.is_dir_empty(&dst) {
                    return Err(FsError::directory_not_empty(to));
                }
                state.dirs.remove(&dst);
            }
            Self::update_paths_after_rename(&mut state, &src, &dst);
        } else {
            if state.dirs.contains_key(&dst) {
                return Err(FsError::is_a_directory(to));
            }
            if let Some(node) = state.files.remove(&src) {
                state.files.insert(dst.clone(), node);
            }
        }
        tracing::debug!("memory rename {} -> {}", src.display(), dst.display());
        Ok(())
    }

    fn read_file_inner(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        let full = self.resolve(path)?;
        let node = {
            let state = self.read_state()?;
            if state.dirs.contains_key(&full) {
                return Err(FsError::is_a_directory(path));
            }
            state
                .files
                .get(&full)
                .cloned()
                .ok_or_else(|| FsError::not_found(path))?
        };
        let bytes = node.read().bytes.clone();
        Ok(bytes)
    }

    fn write_file_inner(&self, path: &Path, data: &[u8], perm: u32) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        let mut state = self.write_state()?;
        if state.dirs.contains_key(&full) {
            return Err(FsError::is_a_directory(path));
        }
        if let Some(node) = state.files.get(&full) {
            let mut file = node.write();
            file.bytes = data.to_vec();
            file.mod_time = SystemTime::now();
            return Ok(());
        }
        if let Some(parent) = full.parent() {
            self.mkdir_all_locked(&mut state, parent, DEFAULT_DIR_PERM)?;
        }
        let mut file = FileData::new(perm & 0o7777);
        file.bytes = data.to_vec();
        state.files.insert(full, Arc::new(RwLock::new(file)));
        Ok(())
    }

    fn stat_inner(&self, path: &Path) -> Result<FileInfo, FsError> {
        let full = self.resolve(path)?;
        let state = self.read_state()?;
        if let Some(dir) = state.dirs.get(&full) {
            return Ok(dir.info());
        }
        state
            .files
            .get(&full)
            .map(|node| node.read().info(&full))
            .ok_or_else(|| FsError::not_found(path))
    }

    fn set_attrs(
        &self,
        path: &Path,
        perm: Option<u32>,
        owner: Option<(u32, u32)>,
    ) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        let mut state = self.write_state()?;
        if let Some(dir) = state.dirs.get_mut(&full) {
            if let Some(perm) = perm {
                dir.perm = perm & 0o7777;
            }
            if let Some((uid, gid)) = owner {
                dir.uid = Some(uid);
                dir.gid = Some(gid);
            }
            return Ok(());
        }
        let node = state
            .files
            .get(&full)
            .ok_or_else(|| FsError::not_found(path))?;
        let mut file = node.write();
        if let Some(perm) = perm {
            file.perm = perm & 0o7777;
        }
        if let Some((uid, gid)) = owner {
            file.uid = Some(uid);
            file.gid = Some(gid);
        }
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn fs_type(&self) -> FsType {
        FsType::Memory
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn mkdir(&self, path: &Path, perm: u32) -> FsResult<()> {
        self.mkdir_inner(path, perm).context("mkdir", path, MEMORY)
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> FsResult<()> {
        self.mkdir_all_inner(path, perm)
            .context("mkdir_all", path, MEMORY)
    }

    fn mkdir_temp(&self, dir: &Path, pattern: &str) -> FsResult<PathBuf> {
        self.mkdir_temp_inner(dir, pattern)
            .context("mkdir_temp", dir, MEMORY)
    }

    fn remove_all(&self, path: &Path) -> FsResult<()> {
        self.remove_all_inner(path)
            .context("remove_all", path, MEMORY)
    }

    fn read_dir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        self.read_dir_inner(path).context("read_dir", path, MEMORY)
    }

    fn getwd(&self) -> FsResult<PathBuf> {
        self.read_state()
            .map(|_| PathBuf::from("/"))
            .context("getwd", Path::new("/"), MEMORY)
    }

    fn chdir(&self, path: &Path) -> FsResult<()> {
        self.chdir_inner(path).context("chdir", path, MEMORY)
    }

    fn create(&self, path: &Path) -> FsResult<Box<dyn File>> {
        self.open_file_inner(path, OpenFlags::create_truncate(), DEFAULT_FILE_PERM)
            .map(|f| Box::new(f) as Box<dyn File>)
            .context("create", path, MEMORY)
    }

    fn create_temp(&self, dir: &Path, pattern: &str) -> FsResult<Box<dyn File>> {
        self.create_temp_inner(dir, pattern)
            .map(|f| Box::new(f) as Box<dyn File>)
            .context("create_temp", dir, MEMORY)
    }

    fn open_file(&self, path: &Path, flags: OpenFlags, perm: u32) -> FsResult<Box<dyn File>> {
        self.open_file_inner(path, flags, perm)
            .map(|f| Box::new(f) as Box<dyn File>)
            .context("open", path, MEMORY)
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        self.remove_inner(path).context("remove", path, MEMORY)
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.rename_inner(from, to).context("rename", from, MEMORY)
    }

    fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        self.read_file_inner(path).context("read_file", path, MEMORY)
    }

    fn write_file(&self, path: &Path, data: &[u8], perm: u32) -> FsResult<()> {
        self.write_file_inner(path, data, perm)
            .context("write_file", path, MEMORY)
    }

    fn stat(&self, path: &Path) -> FsResult<FileInfo> {
        self.stat_inner(path).context("stat", path, MEMORY)
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.set_attrs(path, Some(mode), None)
            .context("chmod", path, MEMORY)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> FsResult<()> {
        self.set_attrs(path, None, Some((uid, gid)))
            .context("chown", path, MEMORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn p(s: &str) -> &Path {
        Path::new(s)
    }

    #[test]
    fn test_create_write_stat() {
        let fs = MemoryFileSystem::new("");
        fs.mkdir_all(p("a/b/c"), 0o755).unwrap();
        let mut f = fs.create(p("a/b/c/f.txt")).unwrap();
        f.write_all(b"hi").unwrap();
        f.close().unwrap();

        assert_eq!(fs.stat(p("a/b/c/f.txt")).unwrap().size, 2);
    }

    #[test]
    fn test_handles_share_content() {
        let fs = MemoryFileSystem::new("");
        let mut w = fs.create(p("shared.txt")).unwrap();
        w.write_all(b"payload").unwrap();

        let mut r = fs.open(p("shared.txt")).unwrap();
        let mut out = String::new();
        r.read_to_string(&mut out).unwrap();
        assert_eq!(out, "payload");
        assert!(r.write(b"x").is_err());
    }

    #[test]
    fn test_auto_create_parents() {
        let fs = MemoryFileSystem::new("");
        fs.create(p("x/y/z/file.txt")).unwrap();

        assert!(fs.stat(p("x")).unwrap().is_dir());
        assert!(fs.stat(p("x/y")).unwrap().is_dir());
        assert!(fs.stat(p("x/y/z")).unwrap().is_dir());
    }

    #[test]
    fn test_file_parent_conflict() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("plain"), b"x", 0o644).unwrap();
        let err = fs.create(p("plain/child")).unwrap_err();
        assert!(matches!(err.kind(), FsError::NotADirectory(_)));
        assert!(fs.mkdir_all(p("plain/sub"), 0o755).is_err());
    }

    #[test]
    fn test_mkdir_requires_parent() {
        let fs = MemoryFileSystem::new("");
        let err = fs.mkdir(p("missing/child"), 0o755).unwrap_err();
        assert!(err.is_not_exist());

        fs.mkdir(p("top"), 0o750).unwrap();
        assert_eq!(fs.stat(p("top")).unwrap().perm, 0o750);
        assert!(fs.mkdir(p("top"), 0o755).unwrap_err().is_already_exists());
    }

    #[test]
    fn test_path_normalization() {
        let fs = MemoryFileSystem::new("");
        fs.create(p("/a/b/c.txt")).unwrap();

        assert!(fs.stat(p("a/b/c.txt")).is_ok());
        assert!(fs.stat(p("/a/b/c.txt")).is_ok());
        assert!(fs.stat(p("a/./b/c.txt")).is_ok());
        assert!(fs.stat(p("/")).unwrap().is_dir());
        assert!(fs.stat(p(".")).unwrap().is_dir());
    }

    #[test]
    fn test_traversal_rejected() {
        let fs = MemoryFileSystem::new("/jail");
        let err = fs.create(p("../../etc/passwd")).unwrap_err();
        assert!(matches!(err.kind(), FsError::PathTraversal(_)));
        assert!(fs.read_dir(p(".")).unwrap().is_empty());
    }

    #[test]
    fn test_read_dir_sorted_immediate_children() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("b.txt"), b"b", 0o644).unwrap();
        fs.write_file(p("a.txt"), b"aa", 0o644).unwrap();
        fs.mkdir_all(p("sub/deeper"), 0o755).unwrap();
        fs.write_file(p("sub/inner.txt"), b"", 0o644).unwrap();

        let names: Vec<_> = fs
            .read_dir(p("."))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a.txt", "b.txt", "sub"]);

        let sub = fs.read_dir(p("sub")).unwrap();
        assert_eq!(sub.len(), 2);
        assert!(sub[0].is_dir());
        assert_eq!(sub[1].info.size, 0);

        let err = fs.read_dir(p("a.txt")).unwrap_err();
        assert!(matches!(err.kind(), FsError::NotADirectory(_)));
    }

    #[test]
    fn test_remove_guards_non_empty_dir() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("d/e/f.txt"), b"x", 0o644).unwrap();

        let err = fs.remove(p("d")).unwrap_err();
        assert!(matches!(err.kind(), FsError::DirectoryNotEmpty(_)));

        fs.remove_all(p("d")).unwrap();
        assert!(!fs.exists(p("d")));
        assert!(!fs.exists(p("d/e/f.txt")));
        fs.remove_all(p("d")).unwrap();
    }

    #[test]
    fn test_remove_all_root_keeps_root() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("x/y.txt"), b"x", 0o644).unwrap();
        fs.remove_all(p(".")).unwrap();
        assert!(fs.read_dir(p(".")).unwrap().is_empty());
        assert!(fs.stat(p(".")).unwrap().is_dir());
    }

    #[test]
    fn test_rename_file() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("old.txt"), b"content", 0o600).unwrap();
        fs.rename(p("old.txt"), p("new.txt")).unwrap();

        assert!(fs.stat(p("old.txt")).unwrap_err().is_not_exist());
        let info = fs.stat(p("new.txt")).unwrap();
        assert_eq!(info.perm, 0o600);
        assert_eq!(info.name, "new.txt");
        assert_eq!(fs.read_file(p("new.txt")).unwrap(), b"content");
    }

    #[test]
    fn test_rename_directory_moves_descendants() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("src/a/one.txt"), b"1", 0o644).unwrap();
        fs.write_file(p("src/two.txt"), b"2", 0o644).unwrap();
        fs.mkdir(p("dst"), 0o755).unwrap();

        fs.rename(p("src"), p("dst/moved")).unwrap();

        assert!(!fs.exists(p("src")));
        assert!(!fs.exists(p("src/a/one.txt")));
        assert_eq!(fs.read_file(p("dst/moved/a/one.txt")).unwrap(), b"1");
        assert_eq!(fs.read_file(p("dst/moved/two.txt")).unwrap(), b"2");
        assert_eq!(fs.stat(p("dst/moved/a")).unwrap().name, "a");
        assert_eq!(fs.stat(p("dst/moved")).unwrap().name, "moved");

        let inner = fs.dir_metadata(p("dst/moved/a")).unwrap();
        assert_eq!(inner.name(), "a");
        assert_eq!(inner.parent(), Path::new("/dst/moved"));
    }

    #[test]
    fn test_rename_into_itself_rejected() {
        let fs = MemoryFileSystem::new("");
        fs.mkdir_all(p("a/b"), 0o755).unwrap();
        assert!(fs.rename(p("a"), p("a/b/c")).is_err());
    }

    #[test]
    fn test_rename_over_non_empty_dir_rejected() {
        let fs = MemoryFileSystem::new("");
        fs.mkdir(p("src"), 0o755).unwrap();
        fs.write_file(p("dst/keep.txt"), b"k", 0o644).unwrap();
        let err = fs.rename(p("src"), p("dst")).unwrap_err();
        assert!(matches!(err.kind(), FsError::DirectoryNotEmpty(_)));
    }

    #[test]
    fn test_open_handle_survives_rename() {
        let fs = MemoryFileSystem::new("");
        let mut f = fs.create(p("before.txt")).unwrap();
        fs.rename(p("before.txt"), p("after.txt")).unwrap();
        f.write_all(b"late").unwrap();
        assert_eq!(fs.read_file(p("after.txt")).unwrap(), b"late");
    }

    #[test]
    fn test_open_file_flags() {
        let fs = MemoryFileSystem::new("");
        let err = fs.open(p("nope.txt")).unwrap_err();
        assert!(fs.is_not_exist(&err));

        fs.write_file(p("f.txt"), b"abc", 0o644).unwrap();
        let err = fs
            .open_file(p("f.txt"), OpenFlags::create_exclusive(), 0o644)
            .unwrap_err();
        assert!(err.is_already_exists());

        let mut f = fs.open_file(p("f.txt"), OpenFlags::append(), 0).unwrap();
        f.write_all(b"def").unwrap();
        assert_eq!(fs.read_file(p("f.txt")).unwrap(), b"abcdef");

        fs.create(p("f.txt")).unwrap();
        assert!(fs.read_file(p("f.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_temp_entries() {
        let fs = MemoryFileSystem::new("");
        let dir = fs.mkdir_temp(p(""), "job-*").unwrap();
        assert!(dir.to_string_lossy().starts_with("job-"));
        assert_eq!(fs.stat(&dir).unwrap().perm, 0o700);

        let f = fs.create_temp(&dir, "part-*.bin").unwrap();
        assert!(f.name().starts_with(&dir));
        assert_eq!(f.stat().unwrap().perm, 0o600);

        assert!(fs.mkdir_temp(p("missing"), "x").is_err());
    }

    #[test]
    fn test_chmod_chown() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("f"), b"", 0o644).unwrap();
        fs.mkdir(p("d"), 0o755).unwrap();
        fs.chmod(p("f"), 0o600).unwrap();
        fs.chown(p("d"), 10, 20).unwrap();

        assert_eq!(fs.stat(p("f")).unwrap().perm, 0o600);
        let d = fs.stat(p("d")).unwrap();
        assert_eq!((d.uid, d.gid), (Some(10), Some(20)));
        assert!(fs.chmod(p("ghost"), 0o600).unwrap_err().is_not_exist());
    }

    #[test]
    fn test_cwd_is_virtual() {
        let fs = MemoryFileSystem::new("");
        fs.mkdir(p("d"), 0o755).unwrap();
        fs.chdir(p("d")).unwrap();
        assert_eq!(fs.getwd().unwrap(), Path::new("/"));
        assert!(fs.chdir(p("missing")).is_err());
    }

    #[test]
    fn test_closed_filesystem() {
        let fs = MemoryFileSystem::new("");
        fs.write_file(p("f"), b"x", 0o644).unwrap();
        fs.close();
        fs.close();
        assert!(fs.is_closed());

        let err = fs.read_file(p("f")).unwrap_err();
        assert!(matches!(err.kind(), FsError::FileSystemClosed));
        assert_eq!(err.severity, crate::Severity::Critical);
    }
}
