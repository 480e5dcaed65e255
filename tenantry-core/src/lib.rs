//! # tenantry-core
//!
//! Schema-per-tenant connection management.
//!
//! This crate provides the pieces every tenantry backend and integration
//! builds on:
//! - Tenant context resolution from requests (header, subdomain, token claim, custom)
//! - Schema naming strategies
//! - Tenant validation (local store, remote service, custom callbacks)
//! - An entity registry with presets
//! - A per-schema connection pool manager over a pluggable backend
//! - Task-local tenant context
//!
//! ## Resolving and connecting
//!
//! ```rust
//! use tenantry_core::config::{PoolConfig, ResolutionStrategy, ResolverConfig};
//! use tenantry_core::pool::TenantPoolManager;
//! use tenantry_core::tenant::{RequestInfo, TenantContextResolver};
//! use tenantry_core::testing::MemoryBackend;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tenantry_core::TenancyResult<()> {
//! let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Header));
//! let pool = TenantPoolManager::builder(MemoryBackend::new())
//!     .config(PoolConfig::new().enable_cleanup(false))
//!     .build()?;
//!
//! let request = RequestInfo::new().with_header("x-tenant-id", "acme");
//! let ctx = resolver.resolve(&request).await;
//! let conn = pool.get_connection_for_context(&ctx).await?;
//! assert_eq!(conn.schema().as_str(), "tenant_acme");
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use tenantry_core::config::TenancyConfig;
//!
//! let config = TenancyConfig::from_toml_str(r#"
//!     [pool]
//!     max_connections = 20
//!
//!     [tenant_resolution]
//!     strategy = "subdomain"
//! "#).unwrap();
//! assert_eq!(config.pool.max_connections, 20);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod tenant;
pub mod testing;

pub use config::{EvictionPolicy, PoolConfig, ResolutionStrategy, ResolverConfig, TenancyConfig};
pub use error::{ErrorCode, ErrorContext, TenancyError, TenancyResult};
pub use pool::{
    BackendKind, CleanupReport, ConnectionBackend, ConnectionHandle, PoolStats, TenantConnection,
    TenantPoolManager,
};
pub use tenant::{
    EntityRegistry, RequestInfo, SchemaName, SchemaNamingStrategy, TenantContext,
    TenantContextResolver, TenantId, TenantRecord, TenantValidator,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{PoolConfig, ResolutionStrategy, ResolverConfig, TenancyConfig};
    pub use crate::error::{TenancyError, TenancyResult};
    pub use crate::pool::{ConnectionBackend, ConnectionHandle, TenantPoolManager};
    pub use crate::tenant::task_local::{current_tenant, with_context};
    pub use crate::tenant::{
        DefaultSchemaNaming, EntityRegistry, LocalTenantValidator, RequestInfo, SchemaName,
        TenantContext, TenantContextResolver, TenantId, TenantValidator,
    };
}
