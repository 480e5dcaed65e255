//! # Tenantry
//!
//! Schema-per-tenant connection pooling and tenant resolution for async Rust
//! services.
//!
//! Tenantry provides:
//! - Tenant resolution from requests by header, subdomain, token claim or a
//!   custom function
//! - A pool manager holding one connection per tenant schema, with
//!   single-flight creation, capacity eviction and idle cleanup
//! - Tenant validation against a local store, a remote service or a callback
//! - Backends for `deadpool-postgres` and SQLx, and an Axum layer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tenantry::prelude::*;
//! use tenantry::postgres::PostgresBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TenancyConfig::from_file("tenantry.toml")?;
//!     let backend = PostgresBackend::from_url("postgresql://localhost/app")?;
//!     let pool = TenantPoolManager::builder(backend)
//!         .config(config.pool.clone())
//!         .build()?;
//!     let resolver = TenantContextResolver::new(config.tenant_resolution.clone());
//!
//!     let request = RequestInfo::new().with_header("x-tenant-id", "acme");
//!     let ctx = resolver.resolve(&request).await;
//!     let conn = pool.get_connection_for_context(&ctx).await?;
//!     let client = conn.get().await?;
//!     client.batch_execute("SELECT 1").await?;
//!
//!     pool.close_all().await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use tenantry_core::*;

/// The `deadpool-postgres` backend.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use tenantry_postgres::*;
}

/// The SQLx backend.
#[cfg(feature = "sqlx")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlx")))]
pub mod sqlx {
    pub use tenantry_sqlx::*;
}

/// Axum integration.
#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod axum {
    pub use tenantry_axum::*;
}
