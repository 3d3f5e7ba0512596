//! Filesystem primitives shared by the transfer handlers.

use crate::error::{Result, SyncError};
use crate::stats::EntryMeta;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name prefix of the staging directory used while copying
pub const COPY_STAGING_PREFIX: &str = ".treesync-copy-";

/// Re-stat `path` after a mutation.
pub async fn stat(path: &Path) -> Result<EntryMeta> {
    let md = tokio::fs::symlink_metadata(path).await?;
    Ok(EntryMeta::from_metadata(&md))
}

/// Set modification time (Unix seconds).
pub async fn set_mtime(path: &Path, mtime: i64) -> Result<()> {
    let path = path.to_path_buf();
    let mtime = filetime::FileTime::from_unix_time(mtime, 0);
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime)).await??;
    Ok(())
}

/// Remove a file or a whole directory tree.
pub async fn remove_entry(path: &Path) -> Result<()> {
    let md = tokio::fs::symlink_metadata(path).await?;
    if md.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

/// Remove whatever is at `path`, if anything.
pub async fn clear_target(path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => remove_entry(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Rename `src` to `dst`, falling back to copy + remove when a rename is
/// not possible (e.g. across filesystems).
pub async fn move_entry(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst).await?;
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
            Err(e.into())
        }
        Err(e) => {
            tracing::debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                e
            );
            copy_entry(src, dst).await?;
            remove_entry(src).await
        }
    }
}

/// Recursively copy regular files and directories; anything else is
/// skipped like the walker skips it.
pub async fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst).await?;
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || copy_recursive(&src, &dst)).await??;
    Ok(())
}

/// Copy `src` next to `dst` first and only then swap it in, so a failed
/// copy leaves `dst` as it was.
pub async fn copy_replace(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst).await?;
    let parent = dst
        .parent()
        .ok_or_else(|| SyncError::validation(format!("{} has no parent", dst.display())))?;
    let staging = tempfile::Builder::new()
        .prefix(COPY_STAGING_PREFIX)
        .tempdir_in(parent)?;
    let staged = staging.path().join("entry");

    let from = src.to_path_buf();
    let to = staged.clone();
    tokio::task::spawn_blocking(move || copy_recursive(&from, &to)).await??;
    if !tokio::fs::try_exists(&staged).await? {
        return Err(SyncError::validation(format!(
            "{} is neither a file nor a directory",
            src.display()
        )));
    }

    clear_target(dst).await?;
    tokio::fs::rename(&staged, dst).await?;
    Ok(())
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    let md = fs::symlink_metadata(src)?;
    if md.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() || file_type.is_file() {
                let target: PathBuf = dst.join(entry.file_name());
                copy_recursive(&entry.path(), &target)?;
            }
        }
    } else if md.is_file() {
        fs::copy(src, dst)?;
    }
    Ok(())
}
