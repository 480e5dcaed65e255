//! Per-schema SQLx pools.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tenantry_core::{
    BackendKind, ConnectionBackend, ConnectionHandle, SchemaName, TenancyError, TenancyResult,
};
use tracing::{debug, info, warn};

use crate::config::{SqlxConfig, search_path_statement};
use crate::error::SqlxResult;

/// Opens one `PgPool` per tenant schema.
///
/// Every connection runs `SET search_path` in its `after_connect` hook, so
/// queries against the pool see the tenant's tables unqualified.
#[derive(Debug, Clone)]
pub struct SqlxBackend {
    config: SqlxConfig,
}

impl SqlxBackend {
    /// Create a backend from validated settings.
    pub fn new(config: SqlxConfig) -> SqlxResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a backend from a database URL with default settings.
    pub fn from_url(url: impl Into<String>) -> SqlxResult<Self> {
        Self::new(SqlxConfig::from_url(url)?)
    }

    /// The pool settings.
    pub fn config(&self) -> &SqlxConfig {
        &self.config
    }

    fn pool_options(&self, schema: &SchemaName) -> PgPoolOptions {
        let set_path = search_path_statement(schema);

        PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(self.config.connect_timeout)
            .idle_timeout(self.config.idle_timeout)
            .max_lifetime(self.config.max_lifetime)
            .after_connect(move |conn, _meta| {
                let set_path = set_path.clone();
                Box::pin(async move {
                    conn.execute(set_path.as_str()).await?;
                    Ok(())
                })
            })
    }

    async fn open(&self, schema: &SchemaName) -> SqlxResult<PgPool> {
        let options = self.config.connect_options()?;
        // Opens one connection up front, so unreachable servers fail here.
        let pool = self.pool_options(schema).connect_with(options).await?;

        if self.config.create_schema {
            let statement = format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted());
            if let Err(e) = sqlx::raw_sql(&statement).execute(&pool).await {
                pool.close().await;
                return Err(e.into());
            }
        }

        Ok(pool)
    }
}

#[async_trait]
impl ConnectionBackend for SqlxBackend {
    type Connection = PgPool;

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlx
    }

    async fn create_connection(
        &self,
        schema: &SchemaName,
        entities: &[String],
    ) -> TenancyResult<ConnectionHandle<PgPool>> {
        let pool = self.open(schema).await.map_err(|e| {
            TenancyError::connection_create(schema.as_str(), e.to_string()).with_source(e)
        })?;

        info!(
            schema = %schema,
            max_connections = self.config.max_connections,
            "Opened tenant pool"
        );

        Ok(ConnectionHandle::new(
            schema.clone(),
            BackendKind::Sqlx,
            entities.to_vec(),
            pool,
        ))
    }

    fn is_connection_valid(&self, handle: &ConnectionHandle<PgPool>) -> bool {
        !handle.is_destroyed() && !handle.connection().is_closed()
    }

    async fn destroy_connection(&self, handle: &ConnectionHandle<PgPool>) -> TenancyResult<()> {
        if !handle.mark_destroyed() {
            warn!(schema = %handle.schema(), "Tenant pool already closed");
            return Ok(());
        }

        handle.connection().close().await;
        debug!(schema = %handle.schema(), "Closed tenant pool");
        Ok(())
    }
}
