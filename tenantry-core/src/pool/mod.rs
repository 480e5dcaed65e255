//! Per-schema connection pooling.
//!
//! - [`backend`]: the [`ConnectionBackend`] strategy trait and the uniform
//!   [`ConnectionHandle`].
//! - [`manager`]: the [`TenantPoolManager`] that caches one handle per schema.

pub mod backend;
pub mod manager;

pub use backend::{BackendKind, ConnectionBackend, ConnectionHandle};
pub use manager::{
    CleanupReport, PoolStats, TenantConnection, TenantPoolManager, TenantPoolManagerBuilder,
};
