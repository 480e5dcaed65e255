//! Error types for the PostgreSQL backend.

use tenantry_core::{ErrorCode, TenancyError};
use thiserror::Error;

/// Result type for PostgreSQL backend operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur while managing per-schema PostgreSQL pools.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Connection(_))
    }
}

impl From<PgError> for TenancyError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => TenancyError::config(msg),
            other => TenancyError::new(ErrorCode::ConnectionCreateFailed, other.to_string())
                .with_source(other),
        }
    }
}
