//! Filesystem configuration.
//!
//! A [`Config`] selects the backend and its root. It can be built in code
//! or loaded from TOML:
//!
//! ```toml
//! fs_type = "disk"
//! base_path = "/srv/jobs/scratch"
//! use_ram = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult, OpContext};
use crate::path::has_control_chars;
use crate::types::FsType;

/// Backend selection and options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which backend to build.
    pub fs_type: FsType,
    /// Root directory. Required for disk; optional virtual root for memory.
    pub base_path: Option<PathBuf>,
    /// Seat a memory backend's root on a RAM-backed mount. Ignored by disk,
    /// whose base path is already explicit.
    pub use_ram: bool,
}

impl Config {
    /// Disk backend rooted at `base`.
    pub fn disk(base: impl Into<PathBuf>) -> Self {
        Self {
            fs_type: FsType::Disk,
            base_path: Some(base.into()),
            use_ram: false,
        }
    }

    /// Memory backend with the default root.
    pub fn memory() -> Self {
        Self {
            fs_type: FsType::Memory,
            base_path: None,
            use_ram: false,
        }
    }

    pub fn with_ram(mut self, use_ram: bool) -> Self {
        self.use_ram = use_ram;
        self
    }

    /// Parse from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, FsError> {
        toml::from_str(s).map_err(|e| FsError::InvalidConfig(e.to_string()))
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> FsResult<Self> {
        let path = path.as_ref();
        std::fs::read_to_string(path)
            .map_err(FsError::from)
            .and_then(|text| Self::from_toml_str(&text))
            .and_then(|config| config.validate().map(|()| config))
            .context("load_config", path, None)
    }

    /// Check the fields the selected backend requires.
    ///
    /// Disk needs a non-empty base path without control characters. Memory
    /// accepts any root, but a given one must also be free of control
    /// characters.
    pub fn validate(&self) -> Result<(), FsError> {
        match (self.fs_type, &self.base_path) {
            (FsType::Disk, None) => Err(FsError::InvalidConfig(
                "disk filesystem requires base_path".to_string(),
            )),
            (FsType::Disk, Some(base)) if base.as_os_str().is_empty() => Err(
                FsError::InvalidConfig("disk filesystem requires base_path".to_string()),
            ),
            (_, Some(base)) if has_control_chars(base) => Err(FsError::InvalidConfig(format!(
                "base_path contains control characters: {:?}",
                base
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fs_type, FsType::Disk);
        assert!(config.base_path.is_none());
        assert!(!config.use_ram);
    }

    #[test]
    fn test_validate() {
        assert!(Config::disk("/srv/data").validate().is_ok());
        assert!(Config::memory().validate().is_ok());

        assert!(matches!(
            Config::default().validate(),
            Err(FsError::InvalidConfig(_))
        ));
        assert!(Config::disk("").validate().is_err());
        assert!(Config::disk("/srv/\u{1}bad").validate().is_err());

        let memory = Config {
            base_path: Some(PathBuf::from("/virtual")),
            ..Config::memory()
        };
        assert!(memory.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml_str(
            r#"
            fs_type = "memory"
            use_ram = true
            "#,
        )
        .unwrap();
        assert_eq!(config, Config::memory().with_ram(true));

        let config = Config::from_toml_str(r#"base_path = "/data""#).unwrap();
        assert_eq!(config, Config::disk("/data"));

        assert!(matches!(
            Config::from_toml_str(r#"fs_type = "ftp""#),
            Err(FsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("fs.toml");
        std::fs::write(&good, "fs_type = \"disk\"\nbase_path = \"/tmp/x\"\n").unwrap();
        assert_eq!(Config::load(&good).unwrap(), Config::disk("/tmp/x"));

        let invalid = dir.path().join("bad.toml");
        std::fs::write(&invalid, "fs_type = \"disk\"\n").unwrap();
        let err = Config::load(&invalid).unwrap_err();
        assert!(matches!(err.kind(), FsError::InvalidConfig(_)));

        assert!(Config::load(dir.path().join("missing.toml")).unwrap_err().is_not_exist());
    }
}
