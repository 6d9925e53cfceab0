//! Error types for minifs

use crate::common::protocol::{tokens, RequestKind};
use crate::coordinator::catalog::FileState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Placement Errors ===
    #[error("Insufficient replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    #[error("Replica {0} is no longer connected")]
    ReplicaUnavailable(u16),

    // === Catalog Errors ===
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File {filename} is locked ({state})")]
    Locked { filename: String, state: FileState },

    // === Agreement Errors ===
    #[error("Store of {filename} acknowledged by {acked}/{needed} replicas before the deadline")]
    StoreAckTimeout {
        filename: String,
        acked: usize,
        needed: usize,
    },

    #[error("Remove of {filename} acknowledged by {acked}/{needed} replicas before the deadline")]
    RemoveAckTimeout {
        filename: String,
        acked: usize,
        needed: usize,
    },

    #[error("No replica left to load {0} from")]
    LoadExhausted(String),

    // === Network Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config source error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::Locked { .. }
                | Error::InsufficientReplicas { .. }
                | Error::StoreAckTimeout { .. }
        )
    }

    /// Convert to the single-token reply a client sees for a failed request.
    ///
    /// Lock conflicts are reported the way the request would see the file:
    /// a store sees a name that is taken, a load or remove sees no file.
    pub fn wire_token(&self, request: RequestKind) -> &'static str {
        match self {
            Error::InsufficientReplicas { .. } => tokens::ERROR_NOT_ENOUGH_DSTORES,
            Error::AlreadyExists(_) => tokens::ERROR_FILE_ALREADY_EXISTS,
            Error::NotFound(_) => tokens::ERROR_FILE_DOES_NOT_EXIST,
            Error::Locked { .. } => match request {
                RequestKind::Store => tokens::ERROR_FILE_ALREADY_EXISTS,
                _ => tokens::ERROR_FILE_DOES_NOT_EXIST,
            },
            Error::LoadExhausted(_) => tokens::ERROR_LOAD,
            Error::StoreAckTimeout { .. } => tokens::ERROR_STORE_FAILED,
            Error::RemoveAckTimeout { .. } => tokens::ERROR_REMOVE_FAILED,
            _ => match request {
                RequestKind::Load | RequestKind::Reload => tokens::ERROR_LOAD,
                _ => tokens::ERROR_INTERNAL,
            },
        }
    }

    /// Map an error token received from the coordinator back to an error.
    pub fn from_wire_token(token: &str, filename: &str) -> Self {
        match token {
            tokens::ERROR_NOT_ENOUGH_DSTORES => Error::InsufficientReplicas {
                needed: 0,
                available: 0,
            },
            tokens::ERROR_FILE_ALREADY_EXISTS => Error::AlreadyExists(filename.to_string()),
            tokens::ERROR_FILE_DOES_NOT_EXIST => Error::NotFound(filename.to_string()),
            tokens::ERROR_LOAD => Error::LoadExhausted(filename.to_string()),
            tokens::ERROR_STORE_FAILED => Error::StoreAckTimeout {
                filename: filename.to_string(),
                acked: 0,
                needed: 0,
            },
            tokens::ERROR_REMOVE_FAILED => Error::RemoveAckTimeout {
                filename: filename.to_string(),
                acked: 0,
                needed: 0,
            },
            other => Error::Protocol(format!("unexpected reply: {}", other)),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("lock poisoned: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_token_depends_on_request() {
        let err = Error::Locked {
            filename: "a.txt".into(),
            state: FileState::Storing,
        };
        assert_eq!(
            err.wire_token(RequestKind::Store),
            tokens::ERROR_FILE_ALREADY_EXISTS
        );
        assert_eq!(
            err.wire_token(RequestKind::Load),
            tokens::ERROR_FILE_DOES_NOT_EXIST
        );
        assert_eq!(
            err.wire_token(RequestKind::Remove),
            tokens::ERROR_FILE_DOES_NOT_EXIST
        );
    }

    #[test]
    fn test_operation_errors_map_to_tokens() {
        let insufficient = Error::InsufficientReplicas {
            needed: 3,
            available: 1,
        };
        assert_eq!(
            insufficient.wire_token(RequestKind::Store),
            tokens::ERROR_NOT_ENOUGH_DSTORES
        );
        assert_eq!(
            Error::LoadExhausted("f".into()).wire_token(RequestKind::Reload),
            tokens::ERROR_LOAD
        );
        assert_eq!(
            Error::Internal("boom".into()).wire_token(RequestKind::Load),
            tokens::ERROR_LOAD
        );
        assert_eq!(
            Error::Internal("boom".into()).wire_token(RequestKind::Remove),
            tokens::ERROR_INTERNAL
        );
    }

    #[test]
    fn test_from_wire_token() {
        assert!(matches!(
            Error::from_wire_token(tokens::ERROR_FILE_DOES_NOT_EXIST, "x"),
            Error::NotFound(name) if name == "x"
        ));
        assert!(matches!(
            Error::from_wire_token("GARBAGE", "x"),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ConnectionFailed("refused".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }
}
