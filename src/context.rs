//! Per-session walk configuration.

use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use crate::protocol::DiffOptions;
use crate::stats::SyncFileStats;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Previously synced state, keyed by relative path (`/a/b`).
pub type Snapshot = HashMap<String, SyncFileStats>;

#[derive(Debug, Clone, Default)]
pub struct SyncSessionContext {
    /// Exact names that are never reported
    pub default_filters: HashSet<String>,
    /// Skip dotfiles as if they were in `default_filters`
    pub hide_dotfiles: bool,
    /// Matching paths are reported as filtered and not descended into
    pub path_filters: Option<Regex>,
    pub secure_diff: bool,
    pub first_sync: bool,
    pub snapshot: Arc<Snapshot>,
}

impl SyncSessionContext {
    /// Build the context for one diff session.
    pub fn new(config: &ServerConfig, options: DiffOptions) -> Result<Self> {
        let path_filters = match options.path_filters.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(Regex::new(pattern).map_err(|e| {
                SyncError::validation(format!("invalid path filter: {}", e))
            })?),
            _ => None,
        };

        Ok(Self {
            default_filters: config.default_filters.iter().cloned().collect(),
            hide_dotfiles: !config.show_hidden_files,
            path_filters,
            secure_diff: options.secure_diff,
            first_sync: options.first_sync,
            snapshot: Arc::new(options.snapshot),
        })
    }

    /// Entries with these names are invisible to the protocol.
    pub fn is_default_ignored(&self, name: &str) -> bool {
        (self.hide_dotfiles && name.starts_with('.')) || self.default_filters.contains(name)
    }

    pub fn is_filtered(&self, rel_path: &str) -> bool {
        self.path_filters
            .as_ref()
            .is_some_and(|re| re.is_match(rel_path))
    }

    /// Snapshot entry usable for checksum reuse, if any.
    pub fn reusable_snapshot(&self, rel_path: &str) -> Option<&SyncFileStats> {
        if !self.secure_diff || self.first_sync {
            return None;
        }
        self.snapshot.get(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignore_and_dotfiles() {
        let mut config = ServerConfig::default();
        config.show_hidden_files = false;
        let ctx = SyncSessionContext::new(&config, DiffOptions::default()).unwrap();

        assert!(ctx.is_default_ignored(".DS_Store"));
        assert!(ctx.is_default_ignored(".hidden"));
        assert!(ctx.is_default_ignored("Thumbs.db"));
        assert!(!ctx.is_default_ignored("notes.txt"));
    }

    #[test]
    fn test_invalid_filter_is_validation_error() {
        let options = DiffOptions {
            path_filters: Some("([".to_string()),
            ..Default::default()
        };
        let err = SyncSessionContext::new(&ServerConfig::default(), options).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_snapshot_only_used_for_secure_resync() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "/a".to_string(),
            SyncFileStats {
                is_dir: false,
                size: 1,
                mtime: 1,
                ino: 1,
                checksum: Some("c".into()),
            },
        );
        let mut options = DiffOptions {
            secure_diff: true,
            first_sync: false,
            snapshot,
            ..Default::default()
        };

        let ctx = SyncSessionContext::new(&ServerConfig::default(), options.clone()).unwrap();
        assert!(ctx.reusable_snapshot("/a").is_some());

        options.first_sync = true;
        let ctx = SyncSessionContext::new(&ServerConfig::default(), options).unwrap();
        assert!(ctx.reusable_snapshot("/a").is_none());
    }
}
