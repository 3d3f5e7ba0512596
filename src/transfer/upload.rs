//! Upload: write to a sibling temp file, verify, then rename into place.

use super::{fsops, TransferOps};
use crate::collab::{Destination, LockDepth, SyncUser};
use crate::error::{Result, SyncError};
use crate::protocol::{Identity, UploadRequest};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Name prefix of in-flight upload files
pub const UPLOAD_TEMP_PREFIX: &str = ".treesync-upload-";

/// Copy buffer for incoming bodies (256KB)
const UPLOAD_BUF_SIZE: usize = 256 * 1024;

impl TransferOps {
    /// Store `body` at `dest` while holding a lock on it.
    pub async fn upload<R>(
        &self,
        user: &SyncUser,
        dest: &Destination,
        req: &UploadRequest,
        body: &mut R,
    ) -> Result<Identity>
    where
        R: AsyncRead + Unpin + Send,
    {
        if dest.over_quota {
            return Err(SyncError::QuotaExceeded);
        }
        if let Ok(md) = tokio::fs::symlink_metadata(&dest.real_path).await {
            if md.is_dir() {
                return Err(SyncError::validation(format!("{} is a directory", dest.url)));
            }
        }

        self.check_conflicts(user, dest, LockDepth::Zero).await?;
        let (acquired, lock) = self
            .locks
            .create_or_refresh(user, dest, LockDepth::Zero, Some(self.config.upload_lock_ttl()))
            .await?;
        if !acquired {
            return Err(SyncError::LockConflict { lock });
        }

        let result = self.write_upload(dest, req, body).await;

        if let Err(e) = self.locks.remove_lock(&lock.key).await {
            tracing::warn!("Failed to release upload lock {} on {}: {}", lock.key, dest.url, e);
        }
        if let Ok(identity) = &result {
            tracing::debug!("{} uploaded {} (ino {})", user.login, dest.url, identity.ino);
        }
        result
    }

    async fn write_upload<R>(
        &self,
        dest: &Destination,
        req: &UploadRequest,
        body: &mut R,
    ) -> Result<Identity>
    where
        R: AsyncRead + Unpin + Send,
    {
        let parent = dest
            .real_path
            .parent()
            .ok_or_else(|| SyncError::validation(format!("{} has no parent", dest.url)))?;
        tokio::fs::create_dir_all(parent).await?;

        // Dropping `temp` on any early return removes the file
        let temp = tempfile::Builder::new()
            .prefix(UPLOAD_TEMP_PREFIX)
            .tempfile_in(parent)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut hasher = req.checksum.as_ref().map(|_| self.config.checksum.hasher());
        let mut buf = vec![0u8; UPLOAD_BUF_SIZE];
        let mut written = 0u64;

        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if let Some(h) = hasher.as_mut() {
                h.update(&buf[..n]);
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let (Some(declared), Some(hasher)) = (&req.checksum, hasher) {
            let computed = hasher.finalize();
            if !computed.eq_ignore_ascii_case(declared) {
                discard(temp, &dest.url);
                return Err(SyncError::Integrity(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    dest.url, declared, computed
                )));
            }
        } else if written != req.size {
            discard(temp, &dest.url);
            return Err(SyncError::Integrity(format!(
                "size mismatch for {}: expected {} bytes, got {}",
                dest.url, req.size, written
            )));
        }

        temp.persist(&dest.real_path).map_err(|e| SyncError::from(e.error))?;
        fsops::set_mtime(&dest.real_path, req.mtime).await?;

        let meta = fsops::stat(&dest.real_path).await?;
        Ok(Identity {
            ino: meta.ino,
            mtime: None,
        })
    }
}

fn discard(temp: NamedTempFile, url: &str) {
    let path = temp.path().to_path_buf();
    if let Err(e) = temp.close() {
        tracing::warn!("Failed to remove upload temp {} for {}: {}", path.display(), url, e);
    }
}
