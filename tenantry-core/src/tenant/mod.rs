//! Tenants: identifiers, schema naming, records, validation and resolution.
//!
//! A request is turned into a [`TenantContext`] by the
//! [`TenantContextResolver`]; the context's schema name is what the pool
//! manager keys connections by.
//!
//! ```rust
//! use tenantry_core::config::{ResolutionStrategy, ResolverConfig};
//! use tenantry_core::tenant::{RequestInfo, TenantContextResolver};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let resolver = TenantContextResolver::new(ResolverConfig::new(ResolutionStrategy::Header));
//! let request = RequestInfo::new().with_header("X-Tenant-Id", "Acme-1");
//!
//! let ctx = resolver.resolve(&request).await;
//! assert_eq!(ctx.tenant_id().unwrap().as_str(), "Acme-1");
//! assert_eq!(ctx.schema_name().unwrap().as_str(), "tenant_acme_1");
//! # }
//! ```

pub mod context;
pub mod entity;
pub mod naming;
pub mod record;
pub mod request;
pub mod resolver;
pub mod task_local;
pub mod validation;

pub use context::{SchemaName, TenantContext, TenantId, is_reserved};
pub use entity::{EntityDefinition, EntityRegistry, EntityRegistryBuilder};
pub use naming::{CustomSchemaNaming, DefaultSchemaNaming, SchemaNamingStrategy};
pub use record::{InMemoryTenantStore, TenantRecord, TenantStatus, TenantStore};
pub use request::RequestInfo;
pub use resolver::{CustomResolverFn, TenantContextResolver};
pub use task_local::{TenantScope, current_tenant, with_context};
pub use validation::{
    CustomTenantValidator, LocalTenantValidator, RemoteTenantValidator, TenantValidator,
    ValidatorFuture,
};
