//! Diff sessions.
//!
//! Validates the request, locates the synced directory and streams the
//! tree walk to the client one JSON line per record:
//!
//! ```text
//! +--------------------+  bounded  +------------------+
//! |    TreeWalker      | --------> |    DiffSink      |
//! | (blocking thread)  |  channel  | (chunked reply)  |
//! +--------------------+           +------------------+
//! ```
//!
//! The walker runs on the blocking pool and stops as soon as the
//! receiving side is dropped, so a client that goes away mid-stream
//! releases every directory handle without extra bookkeeping.

use crate::checksum::ChecksumProvider;
use crate::collab::{DiffSink, PathResolver, PathSettingsStore, SyncUser};
use crate::config::ServerConfig;
use crate::context::SyncSessionContext;
use crate::error::{Result, SyncError};
use crate::protocol::{sentinel_line, DiffOptions, DIFF_HEADERS};
use crate::stats::{OsStat, StatSource};
use crate::walker::{TreeWalker, WalkStats};
use bytes::Bytes;
use http::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Outcome of a diff session that got as far as streaming.
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    pub stats: WalkStats,
    /// True when the sentinel was written
    pub complete: bool,
}

pub struct DiffStreamer {
    config: Arc<ServerConfig>,
    settings: Arc<dyn PathSettingsStore>,
    resolver: Arc<dyn PathResolver>,
    checksum: Arc<dyn ChecksumProvider>,
    stat: Arc<dyn StatSource>,
}

impl DiffStreamer {
    pub fn new(
        config: Arc<ServerConfig>,
        settings: Arc<dyn PathSettingsStore>,
        resolver: Arc<dyn PathResolver>,
        checksum: Arc<dyn ChecksumProvider>,
    ) -> Self {
        Self {
            config,
            settings,
            resolver,
            checksum,
            stat: Arc::new(OsStat),
        }
    }

    pub fn with_stat_source(mut self, stat: Arc<dyn StatSource>) -> Self {
        self.stat = stat;
        self
    }

    /// Run one diff session for `sync_path_id`.
    ///
    /// Setup failures are returned before anything is written to `sink`.
    /// Once streaming has started, failures end up in the stream body and
    /// the sink's final status instead.
    pub async fn start_diff_session(
        &self,
        user: &SyncUser,
        sync_path_id: u64,
        options: DiffOptions,
        sink: &mut dyn DiffSink,
    ) -> Result<DiffSummary> {
        let base = self.locate(user, sync_path_id).await?;
        let ctx = SyncSessionContext::new(&self.config, options)?;

        tracing::debug!(
            "Diff session for {} (path {}): {} secure={} first_sync={} snapshot={}",
            user.login,
            sync_path_id,
            base.display(),
            ctx.secure_diff,
            ctx.first_sync,
            ctx.snapshot.len()
        );

        let walker = TreeWalker::new(base, ctx, self.checksum.clone())
            .with_stat_source(self.stat.clone());
        stream_walk(walker, self.config.channel_capacity, sink).await
    }

    /// Session setup checks, in order; the first failure wins.
    async fn locate(&self, user: &SyncUser, sync_path_id: u64) -> Result<PathBuf> {
        if user.client_id.as_deref().map_or(true, str::is_empty) {
            return Err(SyncError::validation("missing sync client identifier"));
        }

        let settings = self
            .settings
            .get_path_settings(user, sync_path_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("sync path {} not found", sync_path_id)))?;

        let dest = self
            .resolver
            .resolve(user, &settings.segments())
            .await
            .map_err(SyncError::into_bad_request)?
            .ok_or_else(|| {
                SyncError::not_found(format!("location {} not found", settings.remote_path))
            })?;

        if dest.over_quota {
            return Err(SyncError::QuotaExceeded);
        }

        match tokio::fs::metadata(&dest.real_path).await {
            Ok(md) if md.is_dir() => Ok(dest.real_path),
            Ok(_) => Err(SyncError::validation(format!(
                "{} is not a directory",
                dest.url
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::not_found(format!("{} does not exist", dest.url)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Drain `walker` into `sink` as newline-delimited JSON, ending with the
/// sentinel, or with the fault message and a 500 status if the walk
/// breaks off.
pub async fn stream_walk(
    walker: TreeWalker,
    capacity: usize,
    sink: &mut dyn DiffSink,
) -> Result<DiffSummary> {
    let start = Instant::now();
    sink.begin(StatusCode::OK, DIFF_HEADERS).await?;

    let (tx, mut rx) = mpsc::channel::<std::result::Result<Bytes, String>>(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        let mut walker = walker;
        for item in walker.by_ref() {
            let msg = match item {
                Ok(record) => record.to_line().map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let fatal = msg.is_err();
            // Receiver gone: the client disconnected
            if tx.blocking_send(msg).is_err() || fatal {
                break;
            }
        }
        walker.stats().clone()
    });

    let mut fault = None;
    while let Some(msg) = rx.recv().await {
        match msg {
            Ok(line) => {
                if let Err(e) = sink.write(line).await {
                    drop(rx);
                    match handle.await {
                        Ok(stats) => tracing::debug!(
                            "Diff stream closed by peer after {} records: {}",
                            stats.records(),
                            e
                        ),
                        Err(join) => tracing::warn!(
                            "Diff stream closed by peer ({}), walker failed: {}",
                            e,
                            join
                        ),
                    }
                    return Err(e.into());
                }
            }
            Err(msg) => {
                fault = Some(msg);
                break;
            }
        }
    }
    drop(rx);
    let stats = match handle.await {
        Ok(stats) => stats,
        Err(e) => {
            // Counters died with the task
            fault = Some(SyncError::from(e).to_string());
            WalkStats::default()
        }
    };

    let complete = match fault {
        Some(msg) => {
            tracing::error!("Diff walk aborted after {} records: {}", stats.records(), msg);
            sink.write(Bytes::from(format!("{}\n", msg))).await?;
            sink.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            false
        }
        None => {
            sink.write(sentinel_line()).await?;
            true
        }
    };
    sink.finish().await?;

    tracing::debug!(
        "Diff stream done in {:?}: {} files, {} dirs, {} errors, {} filtered, {} hashed, {} reused",
        start.elapsed(),
        stats.files,
        stats.dirs,
        stats.errors,
        stats.filtered,
        stats.hashed,
        stats.reused
    );

    Ok(DiffSummary { stats, complete })
}
