//! Error types for the SQLx backend.

use tenantry_core::{ErrorCode, TenancyError};
use thiserror::Error;

/// Result type alias for SQLx backend operations.
pub type SqlxResult<T> = Result<T, SqlxError>;

/// Errors that can occur while managing per-schema SQLx pools.
#[derive(Error, Debug)]
pub enum SqlxError {
    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

impl SqlxError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}

impl From<SqlxError> for TenancyError {
    fn from(err: SqlxError) -> Self {
        match err {
            SqlxError::Config(msg) => TenancyError::config(msg),
            other => TenancyError::new(ErrorCode::ConnectionCreateFailed, other.to_string())
                .with_source(other),
        }
    }
}
