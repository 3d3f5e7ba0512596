//! Transfer operations invoked by the client after it has diffed the tree.
//!
//! Every mutating handler returns the entry's identity metadata read back
//! from the filesystem, and goes through the lock manager first. `touch`
//! is the exception: sync clients call it in bulk and manage their own
//! concurrency expectations, so it skips the conflict gate unless
//! `strict_touch_locking` is set.

pub mod copy_move;
pub mod fsops;
pub mod make;
pub mod upload;

use crate::collab::{
    ConflictFilter, Destination, LockDepth, LockManager, PathResolver, RemovalPolicy, SyncUser,
};
use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use std::sync::Arc;

pub use upload::UPLOAD_TEMP_PREFIX;

/// An opened file ready to be streamed to the caller.
#[derive(Debug)]
pub struct FileDownload {
    pub file: tokio::fs::File,
    pub size: u64,
    pub mtime: i64,
    pub ino: u64,
}

pub struct TransferOps {
    config: Arc<ServerConfig>,
    resolver: Arc<dyn PathResolver>,
    locks: Arc<dyn LockManager>,
    removal: Arc<dyn RemovalPolicy>,
}

impl TransferOps {
    pub fn new(
        config: Arc<ServerConfig>,
        resolver: Arc<dyn PathResolver>,
        locks: Arc<dyn LockManager>,
        removal: Arc<dyn RemovalPolicy>,
    ) -> Self {
        Self {
            config,
            resolver,
            locks,
            removal,
        }
    }

    /// Fail if someone else's lock covers `dest`.
    async fn check_conflicts(
        &self,
        user: &SyncUser,
        dest: &Destination,
        depth: LockDepth,
    ) -> Result<()> {
        self.locks
            .check_conflicts(dest, depth, ConflictFilter::owned_by(user))
            .await
    }

    /// Lock depth needed to mutate whatever is at `dest`.
    async fn depth_of(dest: &Destination) -> LockDepth {
        match tokio::fs::symlink_metadata(&dest.real_path).await {
            Ok(md) if md.is_dir() => LockDepth::Infinity,
            _ => LockDepth::Zero,
        }
    }

    pub async fn download(&self, user: &SyncUser, dest: &Destination) -> Result<FileDownload> {
        let meta = fsops::stat(&dest.real_path).await?;
        if !meta.is_file {
            return Err(SyncError::validation(format!("{} is not a file", dest.url)));
        }
        let file = tokio::fs::File::open(&dest.real_path).await?;
        tracing::debug!("{} downloads {} ({} bytes)", user.login, dest.url, meta.size);

        Ok(FileDownload {
            file,
            size: meta.size,
            mtime: meta.mtime,
            ino: meta.ino,
        })
    }

    pub async fn delete(&self, user: &SyncUser, dest: &Destination) -> Result<()> {
        tokio::fs::symlink_metadata(&dest.real_path).await?;
        self.check_conflicts(user, dest, Self::depth_of(dest).await)
            .await?;
        self.removal.remove(user, dest).await?;
        tracing::debug!("{} deleted {}", user.login, dest.url);
        Ok(())
    }

    /// Set the modification time of an existing entry.
    pub async fn touch(&self, user: &SyncUser, dest: &Destination, mtime: i64) -> Result<()> {
        if self.config.strict_touch_locking {
            self.check_conflicts(user, dest, LockDepth::Zero).await?;
        }
        tokio::fs::symlink_metadata(&dest.real_path).await?;
        fsops::set_mtime(&dest.real_path, mtime).await
    }
}
