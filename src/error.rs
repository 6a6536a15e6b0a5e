//! Error types for Corvid
//!
//! Provides a unified error type for all client operations.

use thiserror::Error;

use crate::protocol::ReplyError;

/// Result type alias using CorvidError
pub type Result<T> = std::result::Result<T, CorvidError>;

/// Unified error type for Corvid operations
#[derive(Debug, Error)]
pub enum CorvidError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Timed out waiting for reply")]
    Timeout,

    /// The connection failed before this command's reply was read; the
    /// command may or may not have run.
    #[error("No reply received: {0}")]
    NoReply(String),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply (`-ERR ...`).
    #[error("Server error: {0}")]
    Reply(ReplyError),

    // -------------------------------------------------------------------------
    // Handshake Errors
    // -------------------------------------------------------------------------
    #[error("Invalid password: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid database: {0}")]
    InvalidDatabase(String),

    // -------------------------------------------------------------------------
    // Pool Errors
    // -------------------------------------------------------------------------
    #[error("Connection pool exhausted ({max} connections in use)")]
    PoolExhausted { max: usize },

    // -------------------------------------------------------------------------
    // Command Errors
    // -------------------------------------------------------------------------
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Transaction aborted: a watched key changed")]
    TransactionAborted,

    #[error("Command not allowed on a prefixed client: {0}")]
    CommandNotAllowed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CorvidError {
    /// True when the connection that produced this error can no longer be used.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            CorvidError::Io(_)
                | CorvidError::ConnectionClosed
                | CorvidError::Timeout
                | CorvidError::NoReply(_)
                | CorvidError::Protocol(_)
        )
    }

    /// True for failures that may succeed when attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            CorvidError::Reply(err) => err.is_retryable(),
            CorvidError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            CorvidError::ConnectionClosed | CorvidError::Timeout => true,
            _ => false,
        }
    }

    /// The server error reply, if this is one.
    pub fn reply(&self) -> Option<&ReplyError> {
        match self {
            CorvidError::Reply(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ReplyError> for CorvidError {
    fn from(err: ReplyError) -> Self {
        CorvidError::Reply(err)
    }
}
