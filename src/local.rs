//! In-process collaborators.
//!
//! Enough to run the sync core standalone: users live under
//! `<root>/<login>`, locks and path settings are kept in memory.

use crate::collab::{
    ConflictFilter, DbIdentity, Destination, FileLock, LockDepth, LockManager, PathResolver,
    PathSettings, PathSettingsStore, RemovalPolicy, SyncUser,
};
use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use crate::transfer::fsops;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// Reject segments that could escape the user root.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(SyncError::validation(format!(
            "invalid path segment: {:?}",
            segment
        )));
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(SyncError::validation(format!(
            "path segment contains a separator: {:?}",
            segment
        )));
    }
    Ok(())
}

pub struct LocalPathResolver {
    root: PathBuf,
    min_free_space: Option<u64>,
}

impl LocalPathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_free_space: None,
        }
    }

    /// Resolver rooted at `root` with the configured free-space floor.
    pub fn from_config(root: impl Into<PathBuf>, config: &ServerConfig) -> Self {
        Self::new(root).min_free_space(config.min_free_space)
    }

    pub fn min_free_space(mut self, bytes: Option<u64>) -> Self {
        self.min_free_space = bytes;
        self
    }

    pub fn user_root(&self, user: &SyncUser) -> PathBuf {
        self.root.join(&user.login)
    }

    fn over_quota(&self, path: &Path) -> bool {
        let Some(min) = self.min_free_space else {
            return false;
        };
        match fs2::available_space(path) {
            Ok(available) => available < min,
            Err(e) => {
                tracing::warn!("Failed to query free space on {}: {}", path.display(), e);
                false
            }
        }
    }
}

#[async_trait]
impl PathResolver for LocalPathResolver {
    async fn resolve(&self, user: &SyncUser, segments: &[String]) -> Result<Option<Destination>> {
        for segment in segments {
            validate_segment(segment)?;
        }

        let user_root = self.user_root(user);
        if !tokio::fs::try_exists(&user_root).await? {
            return Ok(None);
        }

        let real_path = segments.iter().fold(user_root.clone(), |p, s| p.join(s));
        let path = segments.join("/");

        Ok(Some(Destination {
            real_path,
            url: format!("/{}", path),
            over_quota: self.over_quota(&user_root),
            identity: DbIdentity {
                owner_id: user.id,
                space_id: None,
                path,
            },
        }))
    }
}

// =============================================================================
// Locks
// =============================================================================

/// True if `child` is `parent` or lies below it.
fn is_within(child: &str, parent: &str) -> bool {
    parent.is_empty()
        || child == parent
        || (child.starts_with(parent) && child.as_bytes().get(parent.len()) == Some(&b'/'))
}

struct LockEntry {
    lock: FileLock,
    identity: DbIdentity,
}

impl LockEntry {
    fn expired(&self, now: SystemTime) -> bool {
        self.lock.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether this lock covers `identity` checked at `depth`.
    fn covers(&self, identity: &DbIdentity, depth: LockDepth) -> bool {
        if self.identity.owner_id != identity.owner_id || self.identity.space_id != identity.space_id {
            return false;
        }
        let held = &self.identity.path;
        let wanted = &identity.path;
        held == wanted
            || (self.lock.depth == LockDepth::Infinity && is_within(wanted, held))
            || (depth == LockDepth::Infinity && is_within(held, wanted))
    }
}

#[derive(Default)]
pub struct MemoryLockManager {
    locks: Mutex<HashMap<String, LockEntry>>,
    next_id: AtomicU64,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn conflict<'a>(
        locks: &'a HashMap<String, LockEntry>,
        identity: &DbIdentity,
        depth: LockDepth,
        filter: ConflictFilter,
    ) -> Option<&'a FileLock> {
        let now = SystemTime::now();
        locks
            .values()
            .filter(|e| !e.expired(now))
            .filter(|e| Some(e.lock.owner_id) != filter.ignore_owner)
            .find(|e| e.covers(identity, depth))
            .map(|e| &e.lock)
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn create_or_refresh(
        &self,
        user: &SyncUser,
        dest: &Destination,
        depth: LockDepth,
        ttl: Option<Duration>,
    ) -> Result<(bool, FileLock)> {
        let now = SystemTime::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut locks = self.locks.lock().await;
        locks.retain(|_, e| !e.expired(now));

        if let Some(holder) =
            Self::conflict(&locks, &dest.identity, depth, ConflictFilter::owned_by(user))
        {
            return Ok((false, holder.clone()));
        }

        if let Some(own) = locks
            .values_mut()
            .find(|e| e.lock.owner_id == user.id && e.identity == dest.identity)
        {
            own.lock.expires_at = expires_at;
            own.lock.depth = depth;
            return Ok((true, own.lock.clone()));
        }

        let key = format!("lock-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let lock = FileLock {
            key: key.clone(),
            owner_id: user.id,
            owner_login: user.login.clone(),
            url: dest.url.clone(),
            depth,
            expires_at,
        };
        locks.insert(
            key,
            LockEntry {
                lock: lock.clone(),
                identity: dest.identity.clone(),
            },
        );
        Ok((true, lock))
    }

    async fn check_conflicts(
        &self,
        dest: &Destination,
        depth: LockDepth,
        filter: ConflictFilter,
    ) -> Result<()> {
        let locks = self.locks.lock().await;
        match Self::conflict(&locks, &dest.identity, depth, filter) {
            Some(holder) => Err(SyncError::LockConflict {
                lock: holder.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn remove_lock(&self, key: &str) -> Result<()> {
        self.locks.lock().await.remove(key);
        Ok(())
    }
}

// =============================================================================
// Path settings
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryPathSettings {
    entries: HashMap<(u64, u64), PathSettings>,
}

impl MemoryPathSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, user_id: u64, sync_path_id: u64, remote_path: &str) -> Self {
        self.entries.insert(
            (user_id, sync_path_id),
            PathSettings {
                remote_path: remote_path.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl PathSettingsStore for MemoryPathSettings {
    async fn get_path_settings(
        &self,
        user: &SyncUser,
        sync_path_id: u64,
    ) -> Result<Option<PathSettings>> {
        Ok(self.entries.get(&(user.id, sync_path_id)).cloned())
    }
}

// =============================================================================
// Removal
// =============================================================================

/// Deletes entries for good.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermanentRemoval;

#[async_trait]
impl RemovalPolicy for PermanentRemoval {
    async fn remove(&self, _user: &SyncUser, dest: &Destination) -> Result<()> {
        fsops::remove_entry(&dest.real_path).await
    }
}

/// Moves entries to `<trash_dir>/<login>/<name>.<timestamp>`.
#[derive(Debug, Clone)]
pub struct TrashRemoval {
    trash_dir: PathBuf,
}

impl TrashRemoval {
    pub fn new(trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            trash_dir: trash_dir.into(),
        }
    }
}

#[async_trait]
impl RemovalPolicy for TrashRemoval {
    async fn remove(&self, user: &SyncUser, dest: &Destination) -> Result<()> {
        tokio::fs::symlink_metadata(&dest.real_path).await?;

        let name = dest
            .real_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let target = self
            .trash_dir
            .join(&user.login)
            .join(format!("{}.{}", name, stamp));

        fsops::move_entry(&dest.real_path, &target).await
    }
}

/// Trash when `trash_dir` is configured, permanent removal otherwise.
pub fn removal_policy(config: &ServerConfig) -> Arc<dyn RemovalPolicy> {
    match &config.trash_dir {
        Some(dir) => Arc::new(TrashRemoval::new(dir.clone())),
        None => Arc::new(PermanentRemoval),
    }
}
