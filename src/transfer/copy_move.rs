//! Copy and move within the user's namespace.

use super::{fsops, TransferOps};
use crate::collab::{Destination, LockDepth, SyncUser};
use crate::error::{Result, SyncError};
use crate::protocol::{CopyMoveKind, CopyMoveRequest, Identity};

impl TransferOps {
    /// Copy or move `source` to the path named in `req`, overwriting it.
    ///
    /// Returns the target's inode and modification time as re-read after
    /// the operation; for a copy with a declared mtime that is the
    /// declared value.
    pub async fn copy_move(
        &self,
        user: &SyncUser,
        source: &Destination,
        kind: CopyMoveKind,
        req: &CopyMoveRequest,
    ) -> Result<Identity> {
        let segments: Vec<String> = req
            .destination
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return Err(SyncError::validation("missing destination"));
        }
        let target = self
            .resolver
            .resolve(user, &segments)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("{} not found", req.destination)))?;

        if kind == CopyMoveKind::Copy && target.over_quota {
            return Err(SyncError::QuotaExceeded);
        }
        tokio::fs::symlink_metadata(&source.real_path).await?;
        if target.real_path.starts_with(&source.real_path) {
            return Err(SyncError::validation(format!(
                "cannot {:?} {} into itself",
                kind, source.url
            )));
        }
        if source.real_path.starts_with(&target.real_path) {
            return Err(SyncError::validation(format!(
                "cannot {:?} {} over its parent {}",
                kind, source.url, target.url
            )));
        }

        if kind == CopyMoveKind::Move {
            self.check_conflicts(user, source, LockDepth::Infinity)
                .await?;
        }
        self.check_conflicts(user, &target, LockDepth::Infinity)
            .await?;

        match kind {
            CopyMoveKind::Copy => {
                fsops::copy_replace(&source.real_path, &target.real_path).await?;
                if let Some(mtime) = req.mtime {
                    fsops::set_mtime(&target.real_path, mtime).await?;
                }
            }
            CopyMoveKind::Move => {
                fsops::clear_target(&target.real_path).await?;
                fsops::move_entry(&source.real_path, &target.real_path).await?;
            }
        }

        let meta = fsops::stat(&target.real_path).await?;
        tracing::debug!(
            "{} {:?} {} -> {} (ino {})",
            user.login,
            kind,
            source.url,
            target.url,
            meta.ino
        );
        Ok(Identity {
            ino: meta.ino,
            mtime: Some(meta.mtime),
        })
    }
}
