//! Temporary directory management.
//!
//! [`TempManager`] creates scratch directories under a base directory,
//! preferring a RAM-backed mount when asked, and tracks each one as a
//! [`TempDir`] record until it is removed explicitly, aged out by
//! [`TempManager::cleanup_old_dirs`], or swept by
//! [`TempManager::cleanup_all`].
//!
//! Dropping the manager runs the same sweep as `cleanup_all`. Call
//! [`TempManager::close`] to observe cleanup errors instead of having them
//! logged.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{FileSystemError, FsError, FsResult, OpContext};
use crate::path::ensure_dir;

/// Mount points checked, in order, for RAM-backed temp storage.
const RAM_MOUNTS: &[&str] = &["/dev/shm", "/run/shm"];

/// A tracked temporary directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempDir {
    pub path: PathBuf,
    pub created_at: SystemTime,
    pub prefix: String,
    /// Removed by `cleanup_all` when true; left on disk otherwise.
    pub auto_clean: bool,
}

/// Snapshot of the manager's state.
#[derive(Debug, Clone, Serialize)]
pub struct TempStats {
    pub total_dirs: usize,
    pub auto_clean_dirs: usize,
    /// Bytes used by regular files under all tracked directories.
    pub total_size: u64,
    pub oldest_dir: Option<PathBuf>,
    pub oldest_age_secs: Option<u64>,
    pub base_dir: PathBuf,
    pub using_ram: bool,
}

#[derive(Debug, Default)]
struct State {
    dirs: HashMap<PathBuf, TempDir>,
    closed: bool,
}

/// Creates, tracks and cleans up temporary directories.
#[derive(Debug)]
pub struct TempManager {
    base_dir: PathBuf,
    using_ram: bool,
    state: Mutex<State>,
}

impl Default for TempManager {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TempManager {
    /// Create a manager. With `use_ram`, a RAM-backed mount is used when one
    /// is available; otherwise the OS temp directory.
    pub fn new(use_ram: bool) -> Self {
        let (base_dir, using_ram) = determine_base_dir(use_ram);
        tracing::debug!(
            "temp manager using {} (ram: {})",
            base_dir.display(),
            using_ram
        );
        Self {
            base_dir,
            using_ram,
            state: Mutex::new(State::default()),
        }
    }

    /// Create a manager rooted at `dir`, creating it if needed.
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> FsResult<Self> {
        let base_dir = dir.into();
        ensure_dir(&base_dir).context("temp_manager", &base_dir, None)?;
        Ok(Self {
            base_dir,
            using_ram: false,
            state: Mutex::new(State::default()),
        })
    }

    /// Directory new temp entries are created in.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_using_ram(&self) -> bool {
        self.using_ram
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Create and track a new directory named `<prefix><random>`.
    #[tracing::instrument(skip(self), name = "temp.create_dir")]
    pub fn create_temp_dir(&self, prefix: &str, auto_clean: bool) -> FsResult<TempDir> {
        let mut state = self.state.lock();
        self.create_dir_locked(&mut state, prefix, auto_clean)
            .context("create_temp_dir", &self.base_dir, None)
    }

    fn create_dir_locked(
        &self,
        state: &mut State,
        prefix: &str,
        auto_clean: bool,
    ) -> Result<TempDir, FsError> {
        if state.closed {
            return Err(FsError::FileSystemClosed);
        }
        check_prefix(prefix)?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .keep(true)
            .tempdir_in(&self.base_dir)?;
        let record = TempDir {
            path: dir.path().to_path_buf(),
            created_at: SystemTime::now(),
            prefix: prefix.to_string(),
            auto_clean,
        };
        state.dirs.insert(record.path.clone(), record.clone());
        tracing::debug!("created temp dir {}", record.path.display());
        Ok(record)
    }

    /// Create an untracked file named `<prefix><random>` with mode 0600.
    ///
    /// The caller owns the file; it is not removed by any sweep.
    pub fn create_temp_file(&self, prefix: &str) -> FsResult<(fs::File, PathBuf)> {
        self.create_file_inner(prefix)
            .context("create_temp_file", &self.base_dir, None)
    }

    fn create_file_inner(&self, prefix: &str) -> Result<(fs::File, PathBuf), FsError> {
        if self.state.lock().closed {
            return Err(FsError::FileSystemClosed);
        }
        check_prefix(prefix)?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&self.base_dir)?;
        file.keep().map_err(|e| FsError::Io(e.into()))
    }

    /// Delete a tracked directory and stop tracking it.
    ///
    /// Paths that were not created by this manager are rejected.
    pub fn remove_temp_dir(&self, path: &Path) -> FsResult<()> {
        let mut state = self.state.lock();
        if !state.dirs.contains_key(path) {
            return Err(FsError::InvalidPath(format!(
                "not a managed temp dir: {}",
                path.display()
            )))
            .context("remove_temp_dir", path, None);
        }
        remove_tree(path).context("remove_temp_dir", path, None)?;
        state.dirs.remove(path);
        tracing::debug!("removed temp dir {}", path.display());
        Ok(())
    }

    /// Tracked directories, oldest first.
    pub fn get_temp_dirs(&self) -> Vec<TempDir> {
        let mut dirs: Vec<TempDir> = self.state.lock().dirs.values().cloned().collect();
        dirs.sort_by_key(|d| d.created_at);
        dirs
    }

    /// Remove every tracked directory whose mtime is older than `max_age`.
    ///
    /// Entries that vanished from disk are dropped from tracking. Failures
    /// do not stop the sweep; they are returned together as
    /// [`FsError::Aggregate`]. Returns the number of directories removed.
    #[tracing::instrument(skip(self), name = "temp.cleanup_old")]
    pub fn cleanup_old_dirs(&self, max_age: Duration) -> FsResult<usize> {
        let mut state = self.state.lock();
        let now = SystemTime::now();
        let mut removed = 0;
        let mut errors = Vec::new();

        let paths: Vec<PathBuf> = state.dirs.keys().cloned().collect();
        for path in paths {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    state.dirs.remove(&path);
                    continue;
                }
                Err(e) => {
                    errors.push(FileSystemError::new("stat", path, None, e.into()));
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }
            match remove_tree(&path) {
                Ok(()) => {
                    state.dirs.remove(&path);
                    removed += 1;
                }
                Err(e) => errors.push(FileSystemError::new("remove", path, None, e)),
            }
        }

        if removed > 0 {
            tracing::info!("removed {} temp dirs older than {:?}", removed, max_age);
        }
        aggregate(errors)
            .map(|()| removed)
            .context("cleanup_old_dirs", &self.base_dir, None)
    }

    /// Remove every auto-clean directory and stop tracking all of them.
    ///
    /// Directories created with `auto_clean = false` stay on disk and
    /// become the caller's responsibility.
    #[tracing::instrument(skip(self), name = "temp.cleanup_all")]
    pub fn cleanup_all(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        Self::cleanup_locked(&mut state).context("cleanup_all", &self.base_dir, None)
    }

    fn cleanup_locked(state: &mut State) -> Result<(), FsError> {
        let mut errors = Vec::new();
        for (path, dir) in state.dirs.drain() {
            if !dir.auto_clean {
                continue;
            }
            if let Err(e) = remove_tree(&path) {
                errors.push(FileSystemError::new("remove", path, None, e));
            }
        }
        aggregate(errors)
    }

    /// Sweep like [`cleanup_all`](Self::cleanup_all) and refuse further
    /// creations. Closing twice is a no-op.
    pub fn close(&self) -> FsResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        Self::cleanup_locked(&mut state).context("close", &self.base_dir, None)
    }

    /// Counts and sizes of tracked directories.
    pub fn get_stats(&self) -> TempStats {
        let state = self.state.lock();
        let now = SystemTime::now();
        let oldest = state.dirs.values().min_by_key(|d| d.created_at);

        TempStats {
            total_dirs: state.dirs.len(),
            auto_clean_dirs: state.dirs.values().filter(|d| d.auto_clean).count(),
            total_size: state.dirs.keys().map(|p| dir_size(p.as_path())).sum(),
            oldest_dir: oldest.map(|d| d.path.clone()),
            oldest_age_secs: oldest.map(|d| {
                now.duration_since(d.created_at)
                    .unwrap_or(Duration::ZERO)
                    .as_secs()
            }),
            base_dir: self.base_dir.clone(),
            using_ram: self.using_ram,
        }
    }

    /// Free bytes on the RAM-backed mount.
    ///
    /// Uses the manager's base dir when it is RAM-backed, otherwise the
    /// first RAM mount found. Fails with `UnsupportedOperation` when the
    /// platform has none.
    pub fn check_available_ram(&self) -> FsResult<u64> {
        let mount = if self.using_ram {
            Some(self.base_dir.clone())
        } else {
            ram_mount()
        };
        let Some(mount) = mount else {
            return Err(FsError::UnsupportedOperation(
                "no RAM-backed mount available".to_string(),
            ))
            .context("check_available_ram", &self.base_dir, None);
        };
        available_bytes(&mount).context("check_available_ram", &mount, None)
    }
}

impl Drop for TempManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Err(e) = Self::cleanup_locked(state) {
            tracing::warn!("temp cleanup on drop failed: {}", e);
        }
    }
}

fn determine_base_dir(use_ram: bool) -> (PathBuf, bool) {
    if use_ram {
        if let Some(mount) = ram_mount() {
            return (mount, true);
        }
        tracing::debug!("no RAM-backed mount found, using OS temp dir");
    }
    (std::env::temp_dir(), false)
}

/// First RAM-backed mount present on this host, if any.
pub(crate) fn ram_mount() -> Option<PathBuf> {
    if !cfg!(target_os = "linux") {
        return None;
    }
    RAM_MOUNTS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_dir())
}

fn available_bytes(mount: &Path) -> Result<u64, FsError> {
    let stat = rustix::fs::statvfs(mount).map_err(io::Error::from)?;
    Ok(stat.f_bavail.saturating_mul(stat.f_frsize))
}

fn check_prefix(prefix: &str) -> Result<(), FsError> {
    if prefix.contains('/') || prefix.contains(std::path::MAIN_SEPARATOR) {
        return Err(FsError::InvalidPath(format!(
            "prefix contains path separator: {prefix}"
        )));
    }
    if crate::path::has_control_chars(Path::new(prefix)) {
        return Err(FsError::invalid_path(prefix));
    }
    Ok(())
}

/// Remove a directory tree. Already-missing is success.
fn remove_tree(path: &Path) -> Result<(), FsError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn aggregate(errors: Vec<FileSystemError>) -> Result<(), FsError> {
    if errors.is_empty() {
        Ok(())
    } else {
        for e in &errors {
            tracing::warn!("temp cleanup failed: {}", e);
        }
        Err(FsError::Aggregate(errors))
    }
}

/// Total size of regular files under `path`. Unreadable entries count as 0.
fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, TempManager) {
        let tmp = tempfile::TempDir::new().unwrap();
        let manager = TempManager::with_base_dir(tmp.path()).unwrap();
        (tmp, manager)
    }

    fn age(path: &Path, by: Duration) {
        let file = fs::File::open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_create_temp_dir_tracks_entry() {
        let (tmp, manager) = manager();
        let dir = manager.create_temp_dir("job-", true).unwrap();

        assert!(dir.path.is_dir());
        assert!(dir.path.starts_with(tmp.path()));
        assert!(
            dir.path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("job-")
        );
        assert_eq!(manager.get_temp_dirs(), vec![dir]);
    }

    #[test]
    fn test_prefix_with_separator_rejected() {
        let (_tmp, manager) = manager();
        let err = manager.create_temp_dir("../x", true).unwrap_err();
        assert!(matches!(err.kind(), FsError::InvalidPath(_)));
    }

    #[test]
    fn test_get_temp_dirs_oldest_first() {
        let (_tmp, manager) = manager();
        let first = manager.create_temp_dir("a", true).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = manager.create_temp_dir("b", true).unwrap();

        let dirs = manager.get_temp_dirs();
        assert_eq!(dirs[0].path, first.path);
        assert_eq!(dirs[1].path, second.path);
    }

    #[test]
    fn test_remove_temp_dir_only_tracked() {
        let (tmp, manager) = manager();
        let dir = manager.create_temp_dir("x", false).unwrap();
        std::fs::write(dir.path.join("data"), b"payload").unwrap();

        manager.remove_temp_dir(&dir.path).unwrap();
        assert!(!dir.path.exists());
        assert!(manager.get_temp_dirs().is_empty());

        let stray = tmp.path().join("stray");
        std::fs::create_dir(&stray).unwrap();
        assert!(manager.remove_temp_dir(&stray).is_err());
        assert!(stray.exists());
    }

    #[test]
    fn test_cleanup_old_dirs_by_age() {
        let (_tmp, manager) = manager();
        let old = manager.create_temp_dir("old", false).unwrap();
        let young = manager.create_temp_dir("young", true).unwrap();
        age(&old.path, Duration::from_secs(3600));

        let removed = manager.cleanup_old_dirs(Duration::from_secs(60)).unwrap();

        assert_eq!(removed, 1);
        assert!(!old.path.exists());
        assert!(young.path.exists());
        assert_eq!(manager.get_temp_dirs(), vec![young]);
    }

    #[test]
    fn test_cleanup_old_dirs_forgets_vanished() {
        let (_tmp, manager) = manager();
        let dir = manager.create_temp_dir("gone", true).unwrap();
        std::fs::remove_dir(&dir.path).unwrap();

        assert_eq!(manager.cleanup_old_dirs(Duration::ZERO).unwrap(), 0);
        assert!(manager.get_temp_dirs().is_empty());
    }

    #[test]
    fn test_cleanup_all_respects_auto_clean() {
        let (_tmp, manager) = manager();
        let auto = manager.create_temp_dir("auto", true).unwrap();
        let kept = manager.create_temp_dir("kept", false).unwrap();

        manager.cleanup_all().unwrap();

        assert!(!auto.path.exists());
        assert!(kept.path.exists());
        assert!(manager.get_temp_dirs().is_empty());
    }

    #[test]
    fn test_close_refuses_new_dirs() {
        let (_tmp, manager) = manager();
        let dir = manager.create_temp_dir("x", true).unwrap();
        manager.close().unwrap();
        manager.close().unwrap();

        assert!(!dir.path.exists());
        assert!(manager.is_closed());
        let err = manager.create_temp_dir("y", true).unwrap_err();
        assert!(matches!(err.kind(), FsError::FileSystemClosed));
        assert!(manager.create_temp_file("z").is_err());
    }

    #[test]
    fn test_drop_cleans_auto_dirs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (auto, kept) = {
            let manager = TempManager::with_base_dir(tmp.path()).unwrap();
            (
                manager.create_temp_dir("auto", true).unwrap(),
                manager.create_temp_dir("kept", false).unwrap(),
            )
        };
        assert!(!auto.path.exists());
        assert!(kept.path.exists());
    }

    #[test]
    fn test_create_temp_file_private() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, manager) = manager();
        let (mut file, path) = manager.create_temp_file("scratch-").unwrap();
        file.write_all(b"data").unwrap();
        drop(file);

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 4);
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert!(manager.get_temp_dirs().is_empty());
    }

    #[test]
    fn test_stats() {
        let (tmp, manager) = manager();
        let a = manager.create_temp_dir("a", true).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        manager.create_temp_dir("b", false).unwrap();
        std::fs::create_dir(a.path.join("nested")).unwrap();
        std::fs::write(a.path.join("nested/blob"), vec![0u8; 100]).unwrap();
        std::fs::write(a.path.join("top"), b"1234").unwrap();

        let stats = manager.get_stats();
        assert_eq!(stats.total_dirs, 2);
        assert_eq!(stats.auto_clean_dirs, 1);
        assert_eq!(stats.total_size, 104);
        assert_eq!(stats.oldest_dir, Some(a.path.clone()));
        assert_eq!(stats.base_dir, tmp.path());
        assert!(!stats.using_ram);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_dirs"], 2);
        assert_eq!(json["using_ram"], false);
    }

    #[test]
    fn test_ram_selection_falls_back() {
        let manager = TempManager::new(false);
        assert!(!manager.is_using_ram());
        assert_eq!(manager.base_dir(), std::env::temp_dir());

        let ram = TempManager::new(true);
        if ram.is_using_ram() {
            assert!(ram.base_dir().is_dir());
            assert!(ram.check_available_ram().is_ok());
        } else {
            assert_eq!(ram.base_dir(), std::env::temp_dir());
        }
    }
}
