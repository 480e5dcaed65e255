//! The tenant connection pool manager.
//!
//! Connections are created lazily, one per schema, through a
//! [`ConnectionBackend`] and cached until they become invalid, are evicted or
//! the manager is closed. Concurrent requests for a schema that is not pooled
//! yet share a single creation.
//!
//! ```rust
//! use tenantry_core::pool::TenantPoolManager;
//! use tenantry_core::testing::MemoryBackend;
//! use tenantry_core::config::PoolConfig;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tenantry_core::TenancyResult<()> {
//! let backend = MemoryBackend::new();
//! let manager = TenantPoolManager::builder(backend.clone())
//!     .config(PoolConfig::new().max_connections(10))
//!     .build()?;
//!
//! let first = manager.get_connection_for_schema("tenant_acme").await?;
//! let second = manager.get_connection_for_schema("tenant_acme").await?;
//! assert!(std::sync::Arc::ptr_eq(&first, &second));
//! assert_eq!(backend.create_count(), 1);
//!
//! manager.close_all().await?;
//! assert_eq!(manager.stats().total, 0);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use super::backend::{ConnectionBackend, ConnectionHandle};
use crate::config::{EvictionPolicy, PoolConfig};
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{EntityRegistry, SchemaName, TenantContext, TenantValidator, task_local};

/// A pooled connection as handed to callers.
pub type TenantConnection<B> = Arc<ConnectionHandle<<B as ConnectionBackend>::Connection>>;

type SharedCreation<C> = Shared<BoxFuture<'static, TenancyResult<Arc<ConnectionHandle<C>>>>>;

/// A point-in-time view of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pooled entries.
    pub total: usize,
    /// Entries the backend still considers valid.
    pub active: usize,
    /// Entries the backend reports invalid.
    pub inactive: usize,
    /// Pooled schemas, oldest first.
    pub schemas: Vec<SchemaName>,
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Entries idle longer than the idle timeout.
    pub idle_evicted: usize,
    /// Entries evicted because occupancy was above the cleanup threshold.
    pub capacity_evicted: usize,
}

impl CleanupReport {
    /// Total entries removed.
    pub fn total(&self) -> usize {
        self.idle_evicted + self.capacity_evicted
    }
}

struct PoolEntry<C> {
    handle: Arc<ConnectionHandle<C>>,
    last_access: Instant,
}

impl<C> PoolEntry<C> {
    fn new(handle: Arc<ConnectionHandle<C>>) -> Self {
        Self {
            handle,
            last_access: Instant::now(),
        }
    }
}

enum Cached<C> {
    Hit(Arc<ConnectionHandle<C>>),
    Stale(Arc<ConnectionHandle<C>>),
    Miss,
}

struct PoolInner<B: ConnectionBackend> {
    config: PoolConfig,
    backend: Arc<B>,
    validator: Option<Arc<dyn TenantValidator>>,
    entities: Arc<EntityRegistry>,
    pool: Mutex<IndexMap<SchemaName, PoolEntry<B::Connection>>>,
    in_flight: Mutex<HashMap<SchemaName, SharedCreation<B::Connection>>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    /// Cleanup was enabled but the manager was built outside a runtime.
    cleanup_deferred: AtomicBool,
}

/// Removes an in-flight creation when the creating task finishes, including
/// by panic.
struct FlightGuard<'a, C> {
    in_flight: &'a Mutex<HashMap<SchemaName, SharedCreation<C>>>,
    schema: &'a SchemaName,
}

impl<C> Drop for FlightGuard<'_, C> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.schema);
    }
}

impl<B: ConnectionBackend> PoolInner<B> {
    /// Look up a schema. Valid entries are touched; invalid ones are removed.
    fn lookup(&self, schema: &SchemaName) -> Cached<B::Connection> {
        let mut pool = self.pool.lock();
        let Some(entry) = pool.get_mut(schema) else {
            return Cached::Miss;
        };

        if self.backend.is_connection_valid(&entry.handle) {
            entry.last_access = Instant::now();
            return Cached::Hit(Arc::clone(&entry.handle));
        }

        match pool.shift_remove(schema) {
            Some(entry) => Cached::Stale(entry.handle),
            None => Cached::Miss,
        }
    }

    async fn create_and_insert(
        &self,
        schema: &SchemaName,
    ) -> TenancyResult<Arc<ConnectionHandle<B::Connection>>> {
        // A caller may have missed the pool just before the previous flight
        // for this schema inserted and left.
        match self.lookup(schema) {
            Cached::Hit(handle) => return Ok(handle),
            Cached::Stale(handle) => self.destroy_logged(schema, &handle).await,
            Cached::Miss => {}
        }

        self.evict_for_capacity().await;

        let entities = self.resolve_entities(schema).await?;
        let handle = self
            .backend
            .create_connection(schema, &entities)
            .await
            .map_err(|e| e.with_schema(schema.as_str()).with_context("create_connection"))?;
        let handle = Arc::new(handle);

        // Other schemas may have been inserted while this one was created.
        let (replaced, overflow) = {
            let mut pool = self.pool.lock();
            let replaced = pool.shift_remove(schema);
            let overflow = if pool.len() >= self.config.max_connections {
                let excess = pool.len() + 1 - self.config.max_connections;
                select_victims(
                    &mut pool,
                    excess.max(self.config.eviction_count()),
                    self.config.eviction_policy,
                )
            } else {
                Vec::new()
            };
            pool.insert(schema.clone(), PoolEntry::new(Arc::clone(&handle)));
            (replaced, overflow)
        };
        if let Some(old) = replaced {
            self.destroy_logged(schema, &old.handle).await;
        }
        if !overflow.is_empty() {
            debug!(
                schema = %schema,
                evicted = overflow.len(),
                "Pool filled during creation, evicting"
            );
            self.destroy_batch(overflow).await;
        }

        info!(
            schema = %schema,
            backend = %self.backend.kind(),
            entities = entities.len(),
            "Created tenant connection"
        );
        Ok(handle)
    }

    async fn resolve_entities(&self, schema: &SchemaName) -> TenancyResult<Vec<String>> {
        let defaults = || self.entities.default_entities().to_vec();

        let Some(validator) = &self.validator else {
            return Ok(defaults());
        };
        if schema.is_reserved() {
            return Ok(defaults());
        }

        let record = validator
            .find_by_code(schema.as_str())
            .await
            .map_err(|e| e.with_schema(schema.as_str()).with_context("find_by_code"))?;

        Ok(match record.and_then(|r| r.enabled_entities) {
            Some(enabled) => self.entities.resolve(&enabled),
            None => defaults(),
        })
    }

    /// Evict a batch when the pool is at capacity.
    async fn evict_for_capacity(&self) -> usize {
        let victims = {
            let mut pool = self.pool.lock();
            if pool.len() < self.config.max_connections {
                return 0;
            }
            select_victims(
                &mut pool,
                self.config.eviction_count(),
                self.config.eviction_policy,
            )
        };

        let count = victims.len();
        info!(
            evicted = count,
            max_connections = self.config.max_connections,
            "Pool at capacity, evicting tenant connections"
        );
        self.destroy_batch(victims).await;
        count
    }

    async fn run_cleanup(&self) -> CleanupReport {
        let idle = {
            let mut pool = self.pool.lock();
            let idle_timeout = self.config.idle_timeout;
            let expired: Vec<SchemaName> = pool
                .iter()
                .filter(|(_, entry)| entry.last_access.elapsed() >= idle_timeout)
                .map(|(schema, _)| schema.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|schema| pool.shift_remove(&schema).map(|e| (schema, e.handle)))
                .collect::<Vec<_>>()
        };
        let idle_evicted = idle.len();
        if idle_evicted > 0 {
            debug!(evicted = idle_evicted, "Evicting idle tenant connections");
            self.destroy_batch(idle).await;
        }

        let over_threshold = {
            let mut pool = self.pool.lock();
            if (pool.len() as f64) > self.config.cleanup_threshold() {
                select_victims(
                    &mut pool,
                    self.config.eviction_count(),
                    self.config.eviction_policy,
                )
            } else {
                Vec::new()
            }
        };
        let capacity_evicted = over_threshold.len();
        if capacity_evicted > 0 {
            debug!(evicted = capacity_evicted, "Pool above cleanup threshold, evicting");
            self.destroy_batch(over_threshold).await;
        }

        CleanupReport {
            idle_evicted,
            capacity_evicted,
        }
    }

    async fn destroy(
        &self,
        schema: &SchemaName,
        handle: &ConnectionHandle<B::Connection>,
    ) -> TenancyResult<()> {
        self.backend
            .destroy_connection(handle)
            .await
            .map_err(|e| e.with_schema(schema.as_str()))
    }

    async fn destroy_logged(&self, schema: &SchemaName, handle: &ConnectionHandle<B::Connection>) {
        if let Err(e) = self.destroy(schema, handle).await {
            warn!(schema = %schema, error = %e, "Failed to destroy tenant connection");
        }
    }

    async fn destroy_batch(&self, victims: Vec<(SchemaName, Arc<ConnectionHandle<B::Connection>>)>) {
        join_all(
            victims
                .iter()
                .map(|(schema, handle)| self.destroy_logged(schema, handle)),
        )
        .await;
    }

    fn stop_cleanup(&self) -> bool {
        self.cleanup_deferred.store(false, Ordering::Release);
        match self.cleanup.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl<B: ConnectionBackend> Drop for PoolInner<B> {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup.get_mut().take() {
            task.abort();
        }
        let remaining = self.pool.get_mut().len();
        if remaining > 0 {
            debug!(remaining, "Pool manager dropped without close_all");
        }
    }
}

fn select_victims<C>(
    pool: &mut IndexMap<SchemaName, PoolEntry<C>>,
    count: usize,
    policy: EvictionPolicy,
) -> Vec<(SchemaName, Arc<ConnectionHandle<C>>)> {
    let count = count.min(pool.len());
    match policy {
        EvictionPolicy::InsertionOrder => pool
            .drain(..count)
            .map(|(schema, entry)| (schema, entry.handle))
            .collect(),
        EvictionPolicy::LeastRecentlyUsed => {
            let mut by_access: Vec<(SchemaName, Instant)> = pool
                .iter()
                .map(|(schema, entry)| (schema.clone(), entry.last_access))
                .collect();
            by_access.sort_by_key(|(_, last_access)| *last_access);
            by_access
                .into_iter()
                .take(count)
                .filter_map(|(schema, _)| pool.shift_remove(&schema).map(|e| (schema, e.handle)))
                .collect()
        }
    }
}

/// Owns one pooled connection per tenant schema.
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct TenantPoolManager<B: ConnectionBackend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: ConnectionBackend> Clone for TenantPoolManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ConnectionBackend> fmt::Debug for TenantPoolManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPoolManager")
            .field("backend", &self.inner.backend.kind())
            .field("config", &self.inner.config)
            .field("pooled", &self.len())
            .field("has_validator", &self.inner.validator.is_some())
            .finish()
    }
}

impl<B: ConnectionBackend> TenantPoolManager<B> {
    /// Start building a manager over `backend`.
    pub fn builder(backend: B) -> TenantPoolManagerBuilder<B> {
        TenantPoolManagerBuilder::new(backend)
    }

    /// The connection for an explicit schema.
    ///
    /// Non-reserved schemas are checked against the validator on every call.
    /// A pooled, valid connection is returned as is; otherwise one is created,
    /// evicting a batch first if the pool is full.
    pub async fn get_connection_for_schema(
        &self,
        schema: impl Into<SchemaName>,
    ) -> TenancyResult<TenantConnection<B>> {
        let schema = schema.into();
        let inner = &self.inner;
        self.start_deferred_cleanup();

        if !schema.is_reserved() {
            if let Some(validator) = &inner.validator {
                let exists = validator
                    .validate_tenant_exists(schema.as_str())
                    .await
                    .map_err(|e| {
                        e.with_schema(schema.as_str())
                            .with_context("validate_tenant_exists")
                    })?;
                if !exists {
                    debug!(schema = %schema, "Rejecting connection for unknown tenant");
                    return Err(TenancyError::tenant_not_found(schema.as_str()));
                }
            }
        }

        match inner.lookup(&schema) {
            Cached::Hit(handle) => {
                crate::tenantry_debug!(schema = %schema, "Tenant connection cache hit");
                return Ok(handle);
            }
            Cached::Stale(handle) => {
                debug!(schema = %schema, "Discarding invalid tenant connection");
                inner.destroy_logged(&schema, &handle).await;
            }
            Cached::Miss => {}
        }

        let flight = {
            let mut in_flight = inner.in_flight.lock();
            match in_flight.get(&schema) {
                Some(flight) => {
                    trace!(schema = %schema, "Joining in-flight connection creation");
                    flight.clone()
                }
                None => {
                    let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                        TenancyError::internal(format!(
                            "tenant connections must be requested inside a Tokio runtime: {}",
                            e
                        ))
                        .with_schema(schema.as_str())
                    })?;
                    let task_inner = Arc::clone(inner);
                    let task_schema = schema.clone();
                    let task = runtime.spawn(async move {
                        let _guard = FlightGuard {
                            in_flight: &task_inner.in_flight,
                            schema: &task_schema,
                        };
                        task_inner.create_and_insert(&task_schema).await
                    });

                    let flight = task
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                Err(TenancyError::internal(format!(
                                    "connection creation task failed: {}",
                                    e
                                )))
                            })
                        })
                        .boxed()
                        .shared();
                    in_flight.insert(schema.clone(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// The connection for an explicitly passed context.
    pub async fn get_connection_for_context(
        &self,
        ctx: &TenantContext,
    ) -> TenancyResult<TenantConnection<B>> {
        let schema = ctx.schema_name().ok_or_else(TenancyError::no_context)?;
        self.get_connection_for_schema(schema).await
    }

    /// The connection for the task-local tenant context.
    pub async fn get_connection_for_current_tenant(&self) -> TenancyResult<TenantConnection<B>> {
        let schema = task_local::current_schema().ok_or_else(TenancyError::no_context)?;
        self.get_connection_for_schema(schema).await
    }

    /// Evict one schema. Does nothing if it is not pooled; destroy failures
    /// are logged.
    pub async fn remove_connection(&self, schema: impl Into<SchemaName>) {
        let schema = schema.into();
        let removed = self.inner.pool.lock().shift_remove(&schema);
        if let Some(entry) = removed {
            debug!(schema = %schema, "Removing tenant connection");
            self.inner.destroy_logged(&schema, &entry.handle).await;
        }
    }

    /// Destroy every pooled connection, clear the pool and stop the cleanup
    /// task.
    ///
    /// Every connection is attempted even if some fail; failures are reported
    /// together as one [`CloseFailed`](crate::ErrorCode::CloseFailed) error.
    /// The manager stays usable afterwards.
    pub async fn close_all(&self) -> TenancyResult<()> {
        let inner = &self.inner;
        inner.stop_cleanup();

        let drained: Vec<_> = inner
            .pool
            .lock()
            .drain(..)
            .map(|(schema, entry)| (schema, entry.handle))
            .collect();
        info!(count = drained.len(), "Closing all tenant connections");

        let failures: Vec<TenancyError> = join_all(
            drained
                .iter()
                .map(|(schema, handle)| inner.destroy(schema, handle)),
        )
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            error!(error = %failure, "Tenant connection failed to close");
        }
        Err(TenancyError::close_failed(&failures))
    }

    /// Recompute pool statistics, re-checking every entry's validity.
    pub fn stats(&self) -> PoolStats {
        let pool = self.inner.pool.lock();
        let active = pool
            .values()
            .filter(|entry| self.inner.backend.is_connection_valid(&entry.handle))
            .count();

        PoolStats {
            total: pool.len(),
            active,
            inactive: pool.len() - active,
            schemas: pool.keys().cloned().collect(),
        }
    }

    /// Run one cleanup pass now: evict idle entries, then a batch if the pool
    /// is above the cleanup threshold.
    pub async fn run_cleanup(&self) -> CleanupReport {
        self.inner.run_cleanup().await
    }

    /// Start the background cleanup task. Returns `false` if it was already
    /// running or no Tokio runtime is available.
    pub fn start_cleanup(&self) -> bool {
        let mut slot = self.inner.cleanup.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        match spawn_cleanup(&self.inner) {
            Some(task) => {
                *slot = Some(task);
                true
            }
            None => {
                warn!("No Tokio runtime available, background cleanup not started");
                false
            }
        }
    }

    fn start_deferred_cleanup(&self) {
        if self.inner.cleanup_deferred.load(Ordering::Acquire)
            && tokio::runtime::Handle::try_current().is_ok()
            && self.inner.cleanup_deferred.swap(false, Ordering::AcqRel)
        {
            self.start_cleanup();
        }
    }

    /// Stop the background cleanup task. Returns whether one was running.
    pub fn stop_cleanup(&self) -> bool {
        self.inner.stop_cleanup()
    }

    /// Whether the background cleanup task is running.
    pub fn is_cleanup_running(&self) -> bool {
        self.inner
            .cleanup
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Whether a schema is pooled, valid or not.
    pub fn contains(&self, schema: &str) -> bool {
        self.inner.pool.lock().contains_key(schema)
    }

    /// Number of pooled entries.
    pub fn len(&self) -> usize {
        self.inner.pool.lock().len()
    }

    /// Check if the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// The entity registry.
    pub fn entities(&self) -> &EntityRegistry {
        &self.inner.entities
    }
}

fn spawn_cleanup<B: ConnectionBackend>(inner: &Arc<PoolInner<B>>) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let weak: Weak<PoolInner<B>> = Arc::downgrade(inner);
    let period = inner.config.cleanup_interval;

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let report = inner.run_cleanup().await;
            if report.total() > 0 {
                debug!(
                    idle = report.idle_evicted,
                    capacity = report.capacity_evicted,
                    "Background cleanup evicted tenant connections"
                );
            }
        }
    }))
}

/// Builder for [`TenantPoolManager`].
pub struct TenantPoolManagerBuilder<B: ConnectionBackend> {
    backend: B,
    validator: Option<Arc<dyn TenantValidator>>,
    entities: Option<Arc<EntityRegistry>>,
    config: PoolConfig,
}

impl<B: ConnectionBackend> TenantPoolManagerBuilder<B> {
    /// Create a builder with default configuration, no validator and an empty
    /// entity registry.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            validator: None,
            entities: None,
            config: PoolConfig::default(),
        }
    }

    /// Gate connection creation on a tenant validator.
    pub fn validator<V: TenantValidator + 'static>(self, validator: V) -> Self {
        self.shared_validator(Arc::new(validator))
    }

    /// Gate connection creation on a shared tenant validator.
    pub fn shared_validator(mut self, validator: Arc<dyn TenantValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Use an entity registry.
    pub fn entities(mut self, registry: impl Into<Arc<EntityRegistry>>) -> Self {
        self.entities = Some(registry.into());
        self
    }

    /// Set the pool configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager, starting background cleanup if enabled.
    ///
    /// Outside a Tokio runtime the cleanup task cannot be spawned yet; it then
    /// starts with the first connection request made inside one.
    pub fn build(self) -> TenancyResult<TenantPoolManager<B>> {
        self.config.validate()?;

        let enable_cleanup = self.config.enable_cleanup;
        let manager = TenantPoolManager {
            inner: Arc::new(PoolInner {
                config: self.config,
                backend: Arc::new(self.backend),
                validator: self.validator,
                entities: self.entities.unwrap_or_default(),
                pool: Mutex::new(IndexMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                cleanup: Mutex::new(None),
                cleanup_deferred: AtomicBool::new(false),
            }),
        };

        if enable_cleanup {
            match spawn_cleanup(&manager.inner) {
                Some(task) => *manager.inner.cleanup.lock() = Some(task),
                None => {
                    debug!("No Tokio runtime yet, background cleanup starts with the first request");
                    manager
                        .inner
                        .cleanup_deferred
                        .store(true, Ordering::Release);
                }
            }
        }
        Ok(manager)
    }
}
