//! Wire-level types of the sync protocol.
//!
//! Diff session body: one JSON object per line, `{ "<path>": value }`,
//! ending with [`DIFF_SENTINEL`]. A stream without the sentinel is
//! incomplete no matter how many lines it carries.

use crate::collab::DiffSink;
use crate::context::Snapshot;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Last line of a successful diff stream
pub const DIFF_SENTINEL: &str = "::sync-diff-done::";

pub const DIFF_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Response headers of a diff session.
pub const DIFF_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", DIFF_CONTENT_TYPE),
    ("Transfer-Encoding", "chunked"),
    ("Cache-Control", "no-cache"),
];

pub fn sentinel_line() -> Bytes {
    Bytes::from(format!("{}\n", DIFF_SENTINEL))
}

/// Client options of a diff session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffOptions {
    pub secure_diff: bool,
    pub first_sync: bool,
    /// Regex matched against relative paths
    pub path_filters: Option<String>,
    pub snapshot: Snapshot,
}

/// Upload parameters declared by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    pub checksum: Option<String>,
    /// Only checked when no checksum is declared
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MakeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeRequest {
    #[serde(rename = "type")]
    pub kind: MakeKind,
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMoveKind {
    Copy,
    Move,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyMoveRequest {
    /// User-visible destination path
    pub destination: String,
    pub mtime: Option<i64>,
}

/// Identity metadata returned by mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub ino: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mtime: Option<i64>,
}

/// [`DiffSink`] over any async writer, e.g. stdout or a socket whose
/// HTTP framing is handled elsewhere.
pub struct ChunkedWriter<W> {
    inner: W,
    status: StatusCode,
}

impl<W: AsyncWrite + Unpin + Send> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            status: StatusCode::OK,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> DiffSink for ChunkedWriter<W> {
    async fn begin(&mut self, status: StatusCode, _headers: &[(&str, &str)]) -> io::Result<()> {
        self.status = status;
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.inner.write_all(&chunk).await
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}
