//! Server configuration, loaded from TOML.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names that never show up in a diff stream
pub const DEFAULT_FILTERS: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    ".directory",
    "$RECYCLE.BIN",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub default_filters: Vec<String>,
    /// When false, dotfiles are silently skipped like `default_filters`
    pub show_hidden_files: bool,
    pub checksum: ChecksumAlgorithm,
    /// Bound of the walker -> response channel
    pub channel_capacity: usize,
    /// TTL of the lock held while an upload is written
    pub upload_lock_ttl_secs: u64,
    /// Check lock conflicts before `touch`
    pub strict_touch_locking: bool,
    /// Below this many free bytes the volume counts as over quota
    pub min_free_space: Option<u64>,
    /// Move deleted entries here instead of removing them
    pub trash_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_filters: DEFAULT_FILTERS.iter().map(|s| s.to_string()).collect(),
            show_hidden_files: true,
            checksum: ChecksumAlgorithm::default(),
            channel_capacity: 256,
            upload_lock_ttl_secs: 60,
            strict_touch_locking: false,
            min_free_space: None,
            trash_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_tilde(path);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::validation(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)
            .map_err(|e| SyncError::validation(format!("invalid config: {}", e)))?;
        if config.channel_capacity == 0 {
            config.channel_capacity = 1;
        }
        config.trash_dir = config.trash_dir.map(|p| expand_tilde(&p));
        Ok(config)
    }

    pub fn upload_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_lock_ttl_secs)
    }
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}
