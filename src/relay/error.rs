// Error types shared across the relay

use crate::relay::session::SessionId;
use std::path::PathBuf;

/// Session table and dispatcher failures
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("server full ({capacity} sessions)")]
    ServerFull { capacity: usize },
    #[error("user '{0}' is already logged in")]
    DuplicateLogin(String),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("relay hub is not running")]
    HubClosed,
}

/// File transfer failures. Each maps to the error code sent to the peer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("malformed upload request: {0:?}")]
    BadUploadFormat(String),
    #[error("file name {0:?} escapes the storage directory")]
    BadFileName(String),
    #[error("no such file: {0}")]
    NoFile(String),
    #[error("cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another transfer is already running on this connection")]
    InProgress,
}

impl TransferError {
    /// Code carried in the `Error` frame sent back to the requester
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::BadUploadFormat(_) => "BAD_FILE_UPLOAD_FORMAT",
            TransferError::BadFileName(_) => "BAD_FILE_NAME",
            TransferError::NoFile(_) => "NOFILE",
            TransferError::Open { .. } => "FILE_OPEN_FAIL",
            TransferError::InProgress => "TRANSFER_IN_PROGRESS",
        }
    }
}
