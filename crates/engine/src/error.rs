//! Engine error types.

use std::path::PathBuf;

use gfm_protocol::ProtocolError;
use gfm_transfer::{SizeFormatError, TransferError};

/// Errors produced by the upload and download engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("source file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{stage} failed for {url} after {attempts} attempt(s): {reason}")]
    Transport {
        stage: &'static str,
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("upload service unavailable at {url}: {reason}")]
    ServiceUnavailable { url: String, reason: String },

    #[error("cannot parse page {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("upload rejected at chunk {chunk}: {reason}")]
    UploadRejected { chunk: u64, reason: String },

    #[error(
        "size mismatch for {}: expected {expected} bytes, got {actual}",
        path.display()
    )]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Format(#[from] SizeFormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns `true` for failures caused by the network or the remote
    /// service, which a caller may retry later as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transport { .. }
                | EngineError::ServiceUnavailable { .. }
                | EngineError::Parse { .. }
                | EngineError::SizeMismatch { .. }
        )
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidUrl(_) => "invalid_url",
            EngineError::NotFound(_) => "not_found",
            EngineError::Transport { .. } => "transport",
            EngineError::ServiceUnavailable { .. } => "service_unavailable",
            EngineError::Parse { .. } => "parse",
            EngineError::UploadRejected { .. } => "upload_rejected",
            EngineError::SizeMismatch { .. } => "size_mismatch",
            EngineError::Format(_) => "format",
            EngineError::Io(_) => "io",
            EngineError::Config(_) => "config",
            EngineError::Cancelled => "cancelled",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<TransferError> for EngineError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(e) => EngineError::Io(e),
            TransferError::Format(e) => EngineError::Format(e),
            TransferError::InvalidSpec(msg) => EngineError::Config(msg),
            short @ TransferError::ShortRead { .. } => EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                short.to_string(),
            )),
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidUrl(url) => EngineError::InvalidUrl(url),
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_carries_context() {
        let err = EngineError::Transport {
            stage: "page fetch",
            url: "https://1.gigafile.nu/x".into(),
            attempts: 6,
            reason: "HTTP 503".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("page fetch"));
        assert!(msg.contains("https://1.gigafile.nu/x"));
        assert!(msg.contains("6 attempt"));
        assert!(msg.contains("HTTP 503"));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(!EngineError::InvalidUrl("x".into()).is_retryable());
        assert!(!EngineError::NotFound("/nope".into()).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
    }

    #[test]
    fn short_read_becomes_io() {
        let err: EngineError = TransferError::ShortRead {
            path: "/a".into(),
            offset: 0,
            expected: 10,
            actual: 4,
        }
        .into();
        match err {
            EngineError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn protocol_error_becomes_invalid_url() {
        let err: EngineError = ProtocolError::InvalidUrl("bad".into()).into();
        assert!(matches!(err, EngineError::InvalidUrl(u) if u == "bad"));
    }
}
