//! Task-local tenant context.
//!
//! A [`TenantContext`] can be passed around explicitly, or scoped over a
//! future so that anything awaited inside it can read it back. The scope is
//! per task: spawned tasks do not inherit it.
//!
//! ```rust
//! use tenantry_core::tenant::{TenantContext, task_local::{with_context, current_schema}};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = TenantContext::new("acme", "tenant_acme");
//! let schema = with_context(ctx, async { current_schema() }).await;
//! assert_eq!(schema.unwrap().as_str(), "tenant_acme");
//! assert!(current_schema().is_none());
//! # }
//! ```

use std::future::Future;

use super::context::{SchemaName, TenantContext, TenantId};
use crate::error::{TenancyError, TenancyResult};

tokio::task_local! {
    static TENANT_CONTEXT: TenantContext;
}

/// Run `f` with `ctx` as the current tenant context.
pub async fn with_context<F, T>(ctx: TenantContext, f: F) -> T
where
    F: Future<Output = T>,
{
    TENANT_CONTEXT.scope(ctx, f).await
}

/// The current context, if one is scoped.
#[inline]
pub fn current_tenant() -> Option<TenantContext> {
    TENANT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// The current tenant identifier, if a bound context is scoped.
#[inline]
pub fn current_tenant_id() -> Option<TenantId> {
    TENANT_CONTEXT
        .try_with(|ctx| ctx.tenant_id().cloned())
        .ok()
        .flatten()
}

/// The current schema name, if a bound context is scoped.
#[inline]
pub fn current_schema() -> Option<SchemaName> {
    TENANT_CONTEXT
        .try_with(|ctx| ctx.schema_name().cloned())
        .ok()
        .flatten()
}

/// Whether a bound context is scoped.
#[inline]
pub fn has_tenant() -> bool {
    TENANT_CONTEXT
        .try_with(TenantContext::has_tenant)
        .unwrap_or(false)
}

/// Run a closure against the current context without cloning it.
#[inline]
pub fn with_current_tenant<F, T>(f: F) -> Option<T>
where
    F: FnOnce(&TenantContext) -> T,
{
    TENANT_CONTEXT.try_with(f).ok()
}

/// The current context, or [`NoTenantContext`](crate::ErrorCode::NoTenantContext) when
/// none is scoped or the scoped one is unbound.
#[inline]
pub fn require_tenant() -> TenancyResult<TenantContext> {
    current_tenant()
        .filter(TenantContext::has_tenant)
        .ok_or_else(TenancyError::no_context)
}

/// A reusable tenant scope.
///
/// ```rust
/// use tenantry_core::tenant::task_local::{TenantScope, current_tenant_id};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scope = TenantScope::new("acme", "tenant_acme");
/// let id = scope.run(async { current_tenant_id() }).await;
/// assert_eq!(id.unwrap().as_str(), "acme");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TenantScope {
    context: TenantContext,
}

impl TenantScope {
    /// Create a scope bound to a tenant and schema.
    pub fn new(tenant_id: impl Into<TenantId>, schema: impl Into<SchemaName>) -> Self {
        Self {
            context: TenantContext::new(tenant_id, schema),
        }
    }

    /// Create from a resolved context.
    pub fn from_context(context: TenantContext) -> Self {
        Self { context }
    }

    /// Get the context.
    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    /// Run a future inside this scope.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: Future<Output = T>,
    {
        TENANT_CONTEXT.scope(self.context.clone(), f).await
    }
}
