//! Create an empty file or a directory, replacing whatever was there.

use super::{fsops, TransferOps};
use crate::collab::{Destination, SyncUser};
use crate::error::Result;
use crate::protocol::{Identity, MakeKind, MakeRequest};

impl TransferOps {
    pub async fn make(
        &self,
        user: &SyncUser,
        dest: &Destination,
        req: &MakeRequest,
    ) -> Result<Identity> {
        self.check_conflicts(user, dest, Self::depth_of(dest).await)
            .await?;

        let existing = tokio::fs::symlink_metadata(&dest.real_path).await.ok();
        match req.kind {
            MakeKind::Directory => {
                if existing.is_some_and(|md| !md.is_dir()) {
                    fsops::remove_entry(&dest.real_path).await?;
                }
                tokio::fs::create_dir_all(&dest.real_path).await?;
            }
            MakeKind::File => {
                if existing.is_some_and(|md| md.is_dir()) {
                    fsops::remove_entry(&dest.real_path).await?;
                }
                fsops::ensure_parent(&dest.real_path).await?;
                tokio::fs::File::create(&dest.real_path).await?;
            }
        }
        fsops::set_mtime(&dest.real_path, req.mtime).await?;

        let meta = fsops::stat(&dest.real_path).await?;
        tracing::debug!("{} created {:?} {}", user.login, req.kind, dest.url);
        Ok(Identity {
            ino: meta.ino,
            mtime: None,
        })
    }
}
