//! Driver error types.

use thiserror::Error;

/// Errors from the master connection and call plumbing.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connection to master failed: {0}")]
    Connect(String),

    #[error("master returned unexpected status {0}")]
    MasterResponse(http::StatusCode),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("master reported error: {0}")]
    Master(String),

    #[error("call issued before subscription completed")]
    NotSubscribed,

    #[error("invalid master address: {0}")]
    Address(String),
}

pub type DriverResult<T> = Result<T, DriverError>;
