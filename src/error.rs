//! Error taxonomy for diff sessions and transfer operations.
//!
//! Every failure that leaves this crate is a [`SyncError`]; the transport
//! turns it into a status line with [`SyncError::status`] or [`map_error`].

use crate::collab::{Destination, FileLock};
use http::StatusCode;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or missing request input.
    #[error("{0}")]
    Validation(String),

    /// Missing path settings or missing filesystem target.
    #[error("{0}")]
    NotFound(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Another owner holds a lock on the destination.
    #[error("the resource is locked by {}", lock.owner_login)]
    LockConflict { lock: FileLock },

    /// Checksum or size mismatch on upload. The temp file is already gone
    /// when this is returned.
    #[error("{0}")]
    Integrity(String),

    /// A filesystem condition that carries its own status.
    #[error("{message}")]
    Filesystem { status: StatusCode, message: String },

    #[error("{0}")]
    Unexpected(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Terminal status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Integrity(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
            Self::LockConflict { .. } => StatusCode::LOCKED,
            Self::Filesystem { status, .. } => *status,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Re-wrap as a bad-request keeping only the message. Used when a path
    /// fails to resolve at session setup, whatever the resolver reported.
    pub fn into_bad_request(self) -> Self {
        match self {
            Self::Validation(_) => self,
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            io::ErrorKind::AlreadyExists => Self::Filesystem {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            io::ErrorKind::InvalidInput => Self::Filesystem {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::Filesystem {
                status: StatusCode::FORBIDDEN,
                message: err.to_string(),
            },
            _ => Self::Unexpected(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unexpected(format!("background task failed: {}", err))
    }
}

/// Map a transfer failure on `dest` to the status and message sent back.
///
/// Lock conflicts become 423, errors with a declared code keep it and
/// everything else is an internal error, logged with the destination.
pub fn map_error(dest: &Destination, err: &SyncError) -> (StatusCode, String) {
    let status = err.status();
    match err {
        SyncError::LockConflict { lock } => {
            tracing::debug!("{} is locked by {} ({})", dest.url, lock.owner_login, lock.key);
        }
        SyncError::Unexpected(msg) => {
            tracing::error!("{}: {}", dest.url, msg);
        }
        _ => {
            tracing::debug!("{}: {} ({})", dest.url, err, status);
        }
    }
    (status, err.to_string())
}
