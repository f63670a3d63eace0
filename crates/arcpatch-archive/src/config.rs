//! Configuration for a resource archive

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    ArchiveError, BUNDLED_DATA_FILE, BUNDLED_INDEX_FILE, LIVE_UPDATE_DATA_FILE,
    LIVE_UPDATE_INDEX_FILE, Result,
};

/// How a file is brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Memory-map the file
    #[default]
    Mapped,
    /// Read through a file handle
    File,
}

/// Configuration for a resource archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory holding the archive files
    pub base_path: PathBuf,

    /// Bundled index file name
    pub index_file: String,

    /// Bundled resource data file name
    pub data_file: String,

    /// Live-update index file name
    pub live_update_index_file: String,

    /// Live-update resource data file name
    pub live_update_data_file: String,

    /// Backing of index files
    pub index_mode: LoadMode,

    /// Backing of the bundled resource data
    pub data_mode: LoadMode,

    /// Backing of the live-update resource data
    pub live_update_mode: LoadMode,

    /// Verify index digests on open
    pub verify_digest: bool,

    /// Minimum spare slots reserved when a patch session clones an index
    pub patch_reserve: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./resources"),
            index_file: BUNDLED_INDEX_FILE.to_string(),
            data_file: BUNDLED_DATA_FILE.to_string(),
            live_update_index_file: LIVE_UPDATE_INDEX_FILE.to_string(),
            live_update_data_file: LIVE_UPDATE_DATA_FILE.to_string(),
            index_mode: LoadMode::Mapped,
            data_mode: LoadMode::Mapped,
            live_update_mode: LoadMode::Mapped,
            verify_digest: true,
            patch_reserve: 16,
        }
    }
}

impl ArchiveConfig {
    /// Create a new configuration with the specified base path
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if the file cannot be read and
    /// `ArchiveError::Config` if it is not valid.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Config` if the text is not a valid
    /// configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ArchiveError::Config(format!("invalid archive config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that file names are usable and do not collide.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let names = [
            &self.index_file,
            &self.data_file,
            &self.live_update_index_file,
            &self.live_update_data_file,
        ];
        for name in names {
            if name.is_empty() {
                return Err(ArchiveError::Config("file names must not be empty".into()));
            }
            if Path::new(name).components().count() != 1 {
                return Err(ArchiveError::Config(format!(
                    "file name {name:?} must not contain path separators"
                )));
            }
        }
        for (i, a) in names.iter().enumerate() {
            if names[i + 1..].contains(a) {
                return Err(ArchiveError::Config(format!(
                    "file name {a:?} is used for more than one archive file"
                )));
            }
        }
        Ok(())
    }

    /// Set the base path
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.base_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the backing of index files
    #[must_use]
    pub const fn with_index_mode(mut self, mode: LoadMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Set the backing of the bundled resource data
    #[must_use]
    pub const fn with_data_mode(mut self, mode: LoadMode) -> Self {
        self.data_mode = mode;
        self
    }

    /// Set the backing of the live-update resource data
    #[must_use]
    pub const fn with_live_update_mode(mut self, mode: LoadMode) -> Self {
        self.live_update_mode = mode;
        self
    }

    /// Use the same backing for every file
    #[must_use]
    pub const fn with_load_mode(self, mode: LoadMode) -> Self {
        self.with_index_mode(mode)
            .with_data_mode(mode)
            .with_live_update_mode(mode)
    }

    /// Enable or disable digest verification on open
    #[must_use]
    pub const fn with_verify_digest(mut self, verify: bool) -> Self {
        self.verify_digest = verify;
        self
    }

    /// Set the minimum spare slots of patch sessions
    #[must_use]
    pub const fn with_patch_reserve(mut self, slots: usize) -> Self {
        self.patch_reserve = slots;
        self
    }

    /// Path of the bundled index
    pub fn index_path(&self) -> PathBuf {
        self.base_path.join(&self.index_file)
    }

    /// Path of the bundled resource data
    pub fn data_path(&self) -> PathBuf {
        self.base_path.join(&self.data_file)
    }

    /// Path of the live-update index
    pub fn live_update_index_path(&self) -> PathBuf {
        self.base_path.join(&self.live_update_index_file)
    }

    /// Path of the live-update resource data
    pub fn live_update_data_path(&self) -> PathBuf {
        self.base_path.join(&self.live_update_data_file)
    }
}
