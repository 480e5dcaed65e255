//! An in-memory connection backend for tests.
//!
//! [`MemoryBackend`] records every create and destroy call and can be told to
//! fail or to report handles invalid, so pool behaviour can be checked
//! without a database.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{TenancyError, TenancyResult};
use crate::pool::{BackendKind, ConnectionBackend, ConnectionHandle};
use crate::tenant::SchemaName;

/// A fake connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConnection {
    /// Unique per backend.
    pub id: u64,
    /// The schema it was opened for.
    pub schema: SchemaName,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: AtomicU64,
    creates: AtomicUsize,
    destroys: AtomicUsize,
    fail_create: AtomicBool,
    fail_destroy: Mutex<HashSet<SchemaName>>,
    invalid: Mutex<HashSet<u64>>,
    create_delay: Mutex<Option<Duration>>,
}

/// A recording backend. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    /// Create a backend that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every create call.
    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self.state.create_delay.lock() = Some(delay);
        self
    }

    /// Make subsequent create calls fail, or succeed again.
    pub fn fail_creates(&self, fail: bool) {
        self.state.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make destroy calls for `schema` fail.
    pub fn fail_destroys_for(&self, schema: impl Into<SchemaName>) {
        self.state.fail_destroy.lock().insert(schema.into());
    }

    /// Report a handle invalid from now on.
    pub fn invalidate(&self, handle: &ConnectionHandle<MemoryConnection>) {
        self.state.invalid.lock().insert(handle.connection().id);
    }

    /// Number of successful create calls.
    pub fn create_count(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    /// Number of handles destroyed, failed attempts included.
    pub fn destroy_count(&self) -> usize {
        self.state.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionBackend for MemoryBackend {
    type Connection = MemoryConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create_connection(
        &self,
        schema: &SchemaName,
        entities: &[String],
    ) -> TenancyResult<ConnectionHandle<MemoryConnection>> {
        let delay = *self.state.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(TenancyError::connection_create(
                schema.as_str(),
                "memory backend configured to fail",
            ));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.creates.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionHandle::new(
            schema.clone(),
            BackendKind::Memory,
            entities.to_vec(),
            MemoryConnection {
                id,
                schema: schema.clone(),
            },
        ))
    }

    fn is_connection_valid(&self, handle: &ConnectionHandle<MemoryConnection>) -> bool {
        !handle.is_destroyed() && !self.state.invalid.lock().contains(&handle.connection().id)
    }

    async fn destroy_connection(
        &self,
        handle: &ConnectionHandle<MemoryConnection>,
    ) -> TenancyResult<()> {
        if !handle.mark_destroyed() {
            warn!(schema = %handle.schema(), "Connection already destroyed");
            return Ok(());
        }

        self.state.destroys.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_destroy.lock().contains(handle.schema()) {
            return Err(TenancyError::connection_destroy(
                handle.schema().as_str(),
                "memory backend configured to fail",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let backend = MemoryBackend::new();
        let handle = backend
            .create_connection(&SchemaName::new("tenant_a"), &[])
            .await
            .unwrap();

        assert!(backend.is_connection_valid(&handle));
        backend.destroy_connection(&handle).await.unwrap();
        backend.destroy_connection(&handle).await.unwrap();

        assert_eq!(backend.destroy_count(), 1);
        assert!(!backend.is_connection_valid(&handle));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        clone
            .create_connection(&SchemaName::new("tenant_a"), &[])
            .await
            .unwrap();
        assert_eq!(backend.create_count(), 1);
    }
}
