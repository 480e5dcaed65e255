//! The backend connection strategy seam.
//!
//! A backend knows how to open a connection scoped to one schema, how to
//! tell whether a handle is still usable, and how to tear it down. The pool
//! manager never branches on which backend it drives.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;

use crate::error::TenancyResult;
use crate::tenant::SchemaName;

/// Which mechanism produced a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// `deadpool-postgres` pools.
    DeadpoolPostgres,
    /// `sqlx` pools.
    Sqlx,
    /// The in-memory test backend.
    Memory,
    /// Any other backend.
    Other(&'static str),
}

impl BackendKind {
    /// A short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeadpoolPostgres => "deadpool-postgres",
            Self::Sqlx => "sqlx",
            Self::Memory => "memory",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A uniform handle around a backend connection.
///
/// The handle is shared by the pool and every caller it was handed to; it is
/// destroyed at most once.
pub struct ConnectionHandle<C> {
    schema: SchemaName,
    kind: BackendKind,
    entities: Vec<String>,
    connection: C,
    created_at: Instant,
    destroyed: AtomicBool,
}

impl<C> ConnectionHandle<C> {
    /// Wrap a freshly created connection.
    pub fn new(
        schema: SchemaName,
        kind: BackendKind,
        entities: Vec<String>,
        connection: C,
    ) -> Self {
        Self {
            schema,
            kind,
            entities,
            connection,
            created_at: Instant::now(),
            destroyed: AtomicBool::new(false),
        }
    }

    /// The schema this connection is scoped to.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// The backend that produced this handle.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Entities the connection was created for.
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// When the handle was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the handle has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Mark the handle destroyed. Returns `true` only for the first call, so
    /// backends can make destruction idempotent.
    pub fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }
}

impl<C> std::ops::Deref for ConnectionHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("schema", &self.schema)
            .field("kind", &self.kind)
            .field("entities", &self.entities)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Creates, checks and destroys schema-scoped connections.
#[async_trait]
pub trait ConnectionBackend: Send + Sync + 'static {
    /// The connection type handed out to callers.
    type Connection: Send + Sync + 'static;

    /// Which mechanism this backend uses.
    fn kind(&self) -> BackendKind;

    /// Open a new connection scoped to `schema`.
    ///
    /// Always does real work; the pool manager does the caching. Must fail
    /// rather than return a partially initialized handle.
    async fn create_connection(
        &self,
        schema: &SchemaName,
        entities: &[String],
    ) -> TenancyResult<ConnectionHandle<Self::Connection>>;

    /// Whether the handle is still usable. Must be cheap and must not block.
    fn is_connection_valid(&self, handle: &ConnectionHandle<Self::Connection>) -> bool;

    /// Tear the connection down. Calling this on an already destroyed handle
    /// is a no-op.
    async fn destroy_connection(
        &self,
        handle: &ConnectionHandle<Self::Connection>,
    ) -> TenancyResult<()>;
}
