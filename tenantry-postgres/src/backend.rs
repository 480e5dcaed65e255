//! Per-schema deadpool pools.
//!
//! Every tenant schema gets its own small `deadpool-postgres` pool whose
//! sessions start with `search_path` pinned to that schema, so unqualified
//! table names resolve inside the tenant's namespace.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tenantry_core::{
    BackendKind, ConnectionBackend, ConnectionHandle, SchemaName, TenancyError, TenancyResult,
};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::{PgConfig, PgPoolSettings};
use crate::error::{PgError, PgResult};

/// A connection pool scoped to one tenant schema.
#[derive(Clone)]
pub struct PgTenantPool {
    pool: Pool,
    schema: SchemaName,
}

impl PgTenantPool {
    /// Get a client whose `search_path` is the tenant schema.
    pub async fn get(&self) -> PgResult<deadpool_postgres::Client> {
        Ok(self.pool.get().await?)
    }

    /// The schema this pool is scoped to.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// Current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            max_size: status.max_size,
            waiting: status.waiting,
        }
    }

    /// Whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// The underlying deadpool pool.
    pub fn inner(&self) -> &Pool {
        &self.pool
    }
}

impl std::fmt::Debug for PgTenantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTenantPool")
            .field("schema", &self.schema)
            .field("status", &self.status())
            .finish()
    }
}

/// Pool status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open.
    pub size: usize,
    /// Idle connections ready for checkout.
    pub available: usize,
    /// Maximum pool size.
    pub max_size: usize,
    /// Tasks waiting for a connection.
    pub waiting: usize,
}

/// Opens one deadpool pool per tenant schema.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    config: PgConfig,
    settings: PgPoolSettings,
}

impl PostgresBackend {
    /// Create a backend with default pool settings.
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            settings: PgPoolSettings::default(),
        }
    }

    /// Create a backend from a database URL.
    pub fn from_url(url: impl Into<String>) -> PgResult<Self> {
        Ok(Self::new(PgConfig::from_url(url)?))
    }

    /// Replace the per-schema pool settings.
    pub fn with_settings(mut self, settings: PgPoolSettings) -> PgResult<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    /// The server configuration.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// The per-schema pool settings.
    pub fn settings(&self) -> &PgPoolSettings {
        &self.settings
    }

    fn build_pool(&self, schema: &SchemaName) -> PgResult<Pool> {
        let manager = Manager::from_config(
            self.config.to_pg_config(schema),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        Pool::builder(manager)
            .max_size(self.settings.max_size)
            .runtime(Runtime::Tokio1)
            .wait_timeout(self.settings.wait_timeout)
            .create_timeout(self.settings.create_timeout)
            .recycle_timeout(self.settings.recycle_timeout)
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {}", e)))
    }

    async fn open(&self, schema: &SchemaName) -> PgResult<Pool> {
        let pool = self.build_pool(schema)?;

        let prepared = async {
            let client = pool.get().await?;
            if self.settings.create_schema {
                client
                    .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted()))
                    .await?;
            }
            Ok::<_, PgError>(())
        }
        .await;

        match prepared {
            Ok(()) => Ok(pool),
            Err(e) => {
                pool.close();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ConnectionBackend for PostgresBackend {
    type Connection = PgTenantPool;

    fn kind(&self) -> BackendKind {
        BackendKind::DeadpoolPostgres
    }

    async fn create_connection(
        &self,
        schema: &SchemaName,
        entities: &[String],
    ) -> TenancyResult<ConnectionHandle<PgTenantPool>> {
        let pool = self.open(schema).await.map_err(|e| {
            TenancyError::connection_create(schema.as_str(), e.to_string()).with_source(e)
        })?;

        info!(
            schema = %schema,
            max_size = self.settings.max_size,
            host = %self.config.host,
            "Opened tenant pool"
        );

        Ok(ConnectionHandle::new(
            schema.clone(),
            BackendKind::DeadpoolPostgres,
            entities.to_vec(),
            PgTenantPool {
                pool,
                schema: schema.clone(),
            },
        ))
    }

    fn is_connection_valid(&self, handle: &ConnectionHandle<PgTenantPool>) -> bool {
        !handle.is_destroyed() && !handle.connection().is_closed()
    }

    async fn destroy_connection(
        &self,
        handle: &ConnectionHandle<PgTenantPool>,
    ) -> TenancyResult<()> {
        if !handle.mark_destroyed() {
            warn!(schema = %handle.schema(), "Tenant pool already closed");
            return Ok(());
        }

        handle.connection().inner().close();
        debug!(schema = %handle.schema(), "Closed tenant pool");
        Ok(())
    }
}
