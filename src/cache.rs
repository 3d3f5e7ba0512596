//! Checksum reuse.
//!
//! A file keeps its snapshot checksum only when type, size, mtime and inode
//! all match what was just observed. Any difference costs a re-hash, never
//! a missed change.

use crate::checksum::ChecksumProvider;
use crate::context::SyncSessionContext;
use crate::stats::EntryMeta;
use std::io;
use std::path::Path;

/// Where a checksum came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// Not a secure diff
    Skipped,
    Reused(String),
    Computed(String),
}

impl Checksum {
    pub fn into_value(self) -> Option<String> {
        match self {
            Self::Skipped => None,
            Self::Reused(c) | Self::Computed(c) => Some(c),
        }
    }
}

pub struct ChecksumCache<'a> {
    ctx: &'a SyncSessionContext,
    provider: &'a dyn ChecksumProvider,
}

impl<'a> ChecksumCache<'a> {
    pub fn new(ctx: &'a SyncSessionContext, provider: &'a dyn ChecksumProvider) -> Self {
        Self { ctx, provider }
    }

    /// Checksum for the regular file at `real_path`, observed as `meta`.
    pub fn resolve(&self, rel_path: &str, real_path: &Path, meta: &EntryMeta) -> io::Result<Checksum> {
        if !self.ctx.secure_diff || meta.is_dir {
            return Ok(Checksum::Skipped);
        }

        if let Some(known) = self.ctx.reusable_snapshot(rel_path) {
            if known.same_identity(meta) {
                if let Some(checksum) = &known.checksum {
                    return Ok(Checksum::Reused(checksum.clone()));
                }
            }
        }

        self.provider.hash(real_path).map(Checksum::Computed)
    }
}
