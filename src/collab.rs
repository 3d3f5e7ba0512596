//! Collaborators the sync core talks to but does not own.
//!
//! Path resolution, locking, path settings, removal policy and the
//! transport response are all reached through these traits. In-process
//! implementations live in [`crate::local`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUser {
    pub id: u64,
    pub login: String,
    /// Identifier of the registered sync client, when the request comes
    /// from one.
    pub client_id: Option<String>,
}

/// Database identity of a resolved path, used as the locking key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbIdentity {
    pub owner_id: u64,
    pub space_id: Option<u64>,
    /// Path relative to the owner or space root.
    pub path: String,
}

/// A user-visible location resolved to the filesystem.
#[derive(Debug, Clone)]
pub struct Destination {
    pub real_path: PathBuf,
    pub url: String,
    pub over_quota: bool,
    pub identity: DbIdentity,
}

#[async_trait]
pub trait PathResolver: Send + Sync {
    /// Resolve user-visible path segments. `Ok(None)` means the location
    /// (space, share, ...) does not exist; `Err` means it may not be
    /// addressed at all.
    async fn resolve(&self, user: &SyncUser, segments: &[String]) -> Result<Option<Destination>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockDepth {
    Zero,
    Infinity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLock {
    pub key: String,
    pub owner_id: u64,
    pub owner_login: String,
    pub url: String,
    pub depth: LockDepth,
    pub expires_at: Option<SystemTime>,
}

/// Which locks `check_conflicts` should ignore.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictFilter {
    pub ignore_owner: Option<u64>,
}

impl ConflictFilter {
    pub fn owned_by(user: &SyncUser) -> Self {
        Self {
            ignore_owner: Some(user.id),
        }
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Create a lock or refresh the caller's existing one. Returns
    /// `(false, holder)` when someone else holds a conflicting lock.
    async fn create_or_refresh(
        &self,
        user: &SyncUser,
        dest: &Destination,
        depth: LockDepth,
        ttl: Option<Duration>,
    ) -> Result<(bool, FileLock)>;

    /// Fail with [`crate::SyncError::LockConflict`] if a lock matching the
    /// filter covers `dest`.
    async fn check_conflicts(
        &self,
        dest: &Destination,
        depth: LockDepth,
        filter: ConflictFilter,
    ) -> Result<()>;

    async fn remove_lock(&self, key: &str) -> Result<()>;
}

/// Stored settings of one synced path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Server-side path, as user-visible segments joined by `/`.
    pub remote_path: String,
}

impl PathSettings {
    pub fn segments(&self) -> Vec<String> {
        self.remote_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
pub trait PathSettingsStore: Send + Sync {
    async fn get_path_settings(
        &self,
        user: &SyncUser,
        sync_path_id: u64,
    ) -> Result<Option<PathSettings>>;
}

/// Trash-or-delete decision for removed entries.
#[async_trait]
pub trait RemovalPolicy: Send + Sync {
    async fn remove(&self, user: &SyncUser, dest: &Destination) -> Result<()>;
}

/// Chunked response the diff stream is written to.
///
/// Once `begin` has been called the status line is on the wire;
/// `set_status` afterwards only records the final outcome for the
/// transport (e.g. access logs, trailers).
#[async_trait]
pub trait DiffSink: Send {
    async fn begin(&mut self, status: StatusCode, headers: &[(&str, &str)]) -> io::Result<()>;
    async fn write(&mut self, chunk: Bytes) -> io::Result<()>;
    fn set_status(&mut self, status: StatusCode);
    async fn finish(&mut self) -> io::Result<()>;
}
