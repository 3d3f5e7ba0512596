//! Tree walker for diff sessions.
//!
//! Lazily enumerates a directory tree depth-first, a directory's record
//! before its children, and yields one [`DiffRecord`] per visible entry.
//! Listing is done by `walkdir`, one name-sorted directory at a time, so
//! memory is bounded by the widest directory.

use crate::cache::{Checksum, ChecksumCache};
use crate::checksum::ChecksumProvider;
use crate::context::SyncSessionContext;
use crate::stats::{collect, Collected, DiffRecord, OsStat, StatSource, SyncFileStats};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::{DirEntry, FilterEntry, WalkDir};

/// A directory could not be listed; the walk cannot continue past it.
#[derive(Debug, Error)]
#[error("unable to read directory {}: {source}", path.display())]
pub struct WalkError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Counters for one walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkStats {
    pub files: u64,
    pub dirs: u64,
    pub errors: u64,
    pub filtered: u64,
    pub hashed: u64,
    pub reused: u64,
}

impl WalkStats {
    pub fn records(&self) -> u64 {
        self.files + self.dirs + self.errors + self.filtered
    }
}

type IgnoreFilter = Box<dyn FnMut(&DirEntry) -> bool + Send>;

pub struct TreeWalker {
    base: PathBuf,
    ctx: SyncSessionContext,
    checksum: Arc<dyn ChecksumProvider>,
    stat: Arc<dyn StatSource>,
    entries: FilterEntry<walkdir::IntoIter, IgnoreFilter>,
    failed: bool,
    stats: WalkStats,
}

impl TreeWalker {
    pub fn new(
        base: impl Into<PathBuf>,
        ctx: SyncSessionContext,
        checksum: Arc<dyn ChecksumProvider>,
    ) -> Self {
        let base = base.into();

        // The root itself is never matched against the ignore rules
        let rules = ctx.clone();
        let visible: IgnoreFilter = Box::new(move |entry: &DirEntry| {
            entry.depth() == 0 || !rules.is_default_ignored(&entry.file_name().to_string_lossy())
        });
        let entries = WalkDir::new(&base)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(visible);

        Self {
            base,
            ctx,
            checksum,
            stat: Arc::new(OsStat),
            entries,
            failed: false,
            stats: WalkStats::default(),
        }
    }

    pub fn with_stat_source(mut self, stat: Arc<dyn StatSource>) -> Self {
        self.stat = stat;
        self
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    /// `/a/b` for `<base>/a/b`, or `None` if a component is not UTF-8.
    fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base).ok()?;
        let mut out = String::new();
        for component in rel.components() {
            if let Component::Normal(name) = component {
                out.push('/');
                out.push_str(name.to_str()?);
            }
        }
        Some(out)
    }

    /// Don't descend into `entry` if walkdir was about to.
    fn prune(&mut self, entry: &DirEntry) {
        if entry.file_type().is_dir() {
            self.entries.skip_current_dir();
        }
    }

    fn visit(&mut self, entry: &DirEntry) -> Option<DiffRecord> {
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            return None;
        }

        let Some(rel) = self.relative_path(entry.path()) else {
            tracing::warn!("Skipping {}: name is not valid UTF-8", entry.path().display());
            self.prune(entry);
            return None;
        };

        let meta = match collect(self.stat.as_ref(), entry.path()) {
            Collected::Entry(meta) => meta,
            Collected::Skipped => {
                self.prune(entry);
                return None;
            }
            Collected::Failed(msg) => {
                self.prune(entry);
                return Some(self.error_record(rel, msg));
            }
        };

        if self.ctx.is_filtered(&rel) {
            self.prune(entry);
            self.stats.filtered += 1;
            return Some(DiffRecord::filtered(rel));
        }

        if meta.is_dir {
            self.stats.dirs += 1;
            return Some(DiffRecord::stat(rel, SyncFileStats::from_meta(&meta, None)));
        }

        let cache = ChecksumCache::new(&self.ctx, self.checksum.as_ref());
        let checksum = match cache.resolve(&rel, entry.path(), &meta) {
            Ok(checksum) => checksum,
            Err(e) => return Some(self.error_record(rel, e.to_string())),
        };
        match checksum {
            Checksum::Computed(_) => self.stats.hashed += 1,
            Checksum::Reused(_) => self.stats.reused += 1,
            Checksum::Skipped => {}
        }
        self.stats.files += 1;
        Some(DiffRecord::stat(
            rel,
            SyncFileStats::from_meta(&meta, checksum.into_value()),
        ))
    }

    fn error_record(&mut self, rel: String, msg: String) -> DiffRecord {
        tracing::warn!("Failed to stat {}: {}", rel, msg);
        self.stats.errors += 1;
        DiffRecord::error(rel, msg)
    }
}

impl Iterator for TreeWalker {
    type Item = Result<DiffRecord, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    self.failed = true;
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.base.clone());
                    return Some(Err(WalkError {
                        path,
                        source: err.into(),
                    }));
                }
            };

            if let Some(record) = self.visit(&entry) {
                return Some(Ok(record));
            }
        }
    }
}
