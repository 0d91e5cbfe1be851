//! Filesystem construction.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use strum::IntoEnumIterator;

use crate::backends::{DiskFileSystem, MemoryFileSystem};
use crate::config::Config;
use crate::error::{FsError, FsResult, OpContext};
use crate::ops::FileSystem;
use crate::temp::{TempManager, ram_mount};
use crate::types::FsType;

/// Prefix for directories backing temp filesystems.
const TEMP_FS_PREFIX: &str = "sandfs-";

/// Builds configured filesystems.
///
/// Temp-rooted filesystems draw their directories from a shared
/// [`TempManager`], which also owns their cleanup.
#[derive(Debug, Clone)]
pub struct Factory {
    temp: Arc<TempManager>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new(Arc::new(TempManager::new(false)))
    }
}

impl Factory {
    pub fn new(temp: Arc<TempManager>) -> Self {
        Self { temp }
    }

    pub fn temp_manager(&self) -> &Arc<TempManager> {
        &self.temp
    }

    /// Validate `config` and build the backend it selects.
    #[tracing::instrument(skip(self), name = "factory.create")]
    pub fn create_file_system(&self, config: &Config) -> FsResult<Box<dyn FileSystem>> {
        let base = config.base_path.clone().unwrap_or_default();
        self.validate_config(config)
            .context("create_file_system", &base, None)?;

        let fs: Box<dyn FileSystem> = match config.fs_type {
            FsType::Disk => Box::new(self.create_disk_file_system(&base)?),
            FsType::Memory => {
                let root = memory_root(config).context("create_file_system", &base, None)?;
                Box::new(self.create_memory_file_system(root))
            }
        };
        tracing::debug!("created {} filesystem at {}", config.fs_type, fs.root().display());
        Ok(fs)
    }

    pub fn create_disk_file_system(&self, base: impl AsRef<Path>) -> FsResult<DiskFileSystem> {
        DiskFileSystem::new(base)
    }

    /// An empty `root` means `/`.
    pub fn create_memory_file_system(&self, root: impl AsRef<Path>) -> MemoryFileSystem {
        MemoryFileSystem::new(root)
    }

    /// Build a filesystem rooted in a fresh auto-clean temp directory.
    ///
    /// The directory is removed again if the backend cannot be built.
    #[tracing::instrument(skip(self), name = "factory.create_temp")]
    pub fn create_temp_file_system(&self, fs_type: FsType) -> FsResult<Box<dyn FileSystem>> {
        self.build_in_temp_dir(fs_type, |config| self.create_file_system(config))
    }

    fn build_in_temp_dir<F>(&self, fs_type: FsType, build: F) -> FsResult<Box<dyn FileSystem>>
    where
        F: FnOnce(&Config) -> FsResult<Box<dyn FileSystem>>,
    {
        let dir = self.temp.create_temp_dir(TEMP_FS_PREFIX, true)?;
        let config = Config {
            fs_type,
            base_path: Some(dir.path.clone()),
            use_ram: self.temp.is_using_ram(),
        };
        match build(&config) {
            Ok(fs) => Ok(fs),
            Err(e) => {
                if let Err(cleanup) = self.temp.remove_temp_dir(&dir.path) {
                    tracing::warn!("failed to remove temp dir after error: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Check `config` without building anything.
    pub fn validate_config(&self, config: &Config) -> Result<(), FsError> {
        config.validate()
    }

    /// Every backend this factory can build.
    pub fn supported_types(&self) -> Vec<FsType> {
        FsType::iter().collect()
    }

    /// True if `name` (case-insensitive) names a supported backend.
    pub fn is_type_supported(&self, name: &str) -> bool {
        Self::parse_type(name).is_ok()
    }

    /// Parse a backend name, failing with [`FsError::FileSystemNotFound`].
    pub fn parse_type(name: &str) -> Result<FsType, FsError> {
        FsType::from_str(name.trim()).map_err(|_| FsError::FileSystemNotFound(name.to_string()))
    }

    /// Build a backend selected by name.
    pub fn create_by_name(&self, name: &str, base: Option<PathBuf>) -> FsResult<Box<dyn FileSystem>> {
        let fs_type = Self::parse_type(name).context(
            "create_file_system",
            base.as_deref().unwrap_or(Path::new("")),
            None,
        )?;
        self.create_file_system(&Config {
            fs_type,
            base_path: base,
            use_ram: false,
        })
    }
}

/// Root for a memory backend. With `use_ram` the root must sit on a
/// RAM-backed mount: the mount itself when no base is given, otherwise a
/// base beneath it.
fn memory_root(config: &Config) -> Result<PathBuf, FsError> {
    let base = config.base_path.clone().unwrap_or_default();
    if !config.use_ram {
        return Ok(base);
    }
    let mount = ram_mount().ok_or_else(|| {
        FsError::UnsupportedOperation("no RAM-backed mount on this host".to_string())
    })?;
    if base.as_os_str().is_empty() {
        Ok(mount)
    } else if base.starts_with(&mount) {
        Ok(base)
    } else {
        Err(FsError::InvalidConfig(format!(
            "{} is not on RAM-backed mount {}",
            base.display(),
            mount.display()
        )))
    }
}
