//! Server side of the tree-diff sync protocol.
//!
//! A sync client asks for a diff session and receives the server tree as a
//! stream of `{ path: stats }` lines. It compares that against its own
//! snapshot and then issues individual transfer operations (upload,
//! download, make, copy/move, delete, touch), each of which answers with
//! the identity metadata the client needs to update its snapshot.
//!
//! ```text
//! TreeWalker -> DiffStreamer -> client        (diff, one way)
//! client -> TransferOps -> fs + locks -> Identity   (per call)
//! ```

pub mod cache;
pub mod checksum;
pub mod collab;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod local;
pub mod protocol;
pub mod stats;
pub mod transfer;
pub mod walker;

pub use checksum::{ChecksumAlgorithm, ChecksumProvider, FileDigest};
pub use collab::{
    ConflictFilter, DbIdentity, Destination, DiffSink, FileLock, LockDepth, LockManager,
    PathResolver, PathSettings, PathSettingsStore, RemovalPolicy, SyncUser,
};
pub use config::ServerConfig;
pub use context::{Snapshot, SyncSessionContext};
pub use diff::{stream_walk, DiffStreamer, DiffSummary};
pub use error::{map_error, Result, SyncError};
pub use protocol::{
    ChunkedWriter, CopyMoveKind, CopyMoveRequest, DiffOptions, Identity, MakeKind, MakeRequest,
    UploadRequest, DIFF_SENTINEL,
};
pub use stats::{DiffRecord, DiffValue, EntryMeta, SpecialStat, StatSource, SyncFileStats};
pub use transfer::{FileDownload, TransferOps};
pub use walker::{TreeWalker, WalkError, WalkStats};
