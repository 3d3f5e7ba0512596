//! Stream the diff of a local directory to stdout.
//!
//! Runs the same walker and serializer as a diff session, without the
//! session setup, which makes it handy for checking what a client would
//! receive for a given tree, snapshot and filter.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use treesync::{
    config::expand_tilde, stream_walk, ChunkedWriter, DiffOptions, FileDigest, ServerConfig,
    Snapshot, SyncSessionContext, TreeWalker,
};

#[derive(Parser, Debug)]
#[command(name = "treesync-scan", version, about = "Print the diff stream of a directory")]
struct Cli {
    /// Directory to walk
    path: PathBuf,

    /// Compute (or reuse) content checksums
    #[arg(long)]
    secure: bool,

    /// Ignore the snapshot and hash every file
    #[arg(long)]
    first_sync: bool,

    /// Regex of relative paths to report as filtered
    #[arg(long)]
    filter: Option<String>,

    /// JSON object of `{ path: [isDir, size, mtime, ino, checksum] }`
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Server config (TOML)
    #[arg(long, env = "TREESYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let snapshot: Snapshot = match &cli.snapshot {
        Some(path) => {
            let path = expand_tilde(path);
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            serde_json::from_str(&text).context("Invalid snapshot JSON")?
        }
        None => Snapshot::new(),
    };

    let options = DiffOptions {
        secure_diff: cli.secure,
        first_sync: cli.first_sync,
        path_filters: cli.filter,
        snapshot,
    };
    let ctx = SyncSessionContext::new(&config, options)?;
    let walker = TreeWalker::new(
        expand_tilde(&cli.path),
        ctx,
        Arc::new(FileDigest::new(config.checksum)),
    );

    let mut sink = ChunkedWriter::new(tokio::io::stdout());
    let summary = stream_walk(walker, config.channel_capacity, &mut sink).await?;

    tracing::info!(
        "{} records ({} files, {} dirs, {} errors, {} filtered), {} hashed, {} reused",
        summary.stats.records(),
        summary.stats.files,
        summary.stats.dirs,
        summary.stats.errors,
        summary.stats.filtered,
        summary.stats.hashed,
        summary.stats.reused
    );

    if !summary.complete {
        anyhow::bail!("walk aborted before completion");
    }
    Ok(())
}
