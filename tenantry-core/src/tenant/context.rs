//! Tenant identifiers, schema names and the per-request tenant context.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque identifier for a tenant, as supplied by a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The physical namespace (database schema) a tenant's tables live in.
///
/// `public` and `default` are reserved: they name shared namespaces and are
/// never checked against the tenant store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    /// The shared `public` schema.
    pub const PUBLIC: &'static str = "public";
    /// The shared `default` schema.
    pub const DEFAULT: &'static str = "default";

    /// Create a new schema name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the schema name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this names one of the reserved shared schemas.
    pub fn is_reserved(&self) -> bool {
        is_reserved(&self.0)
    }

    /// The name as a double-quoted SQL identifier.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }

    /// Convert to the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Whether `name` is one of the reserved schema literals.
pub fn is_reserved(name: &str) -> bool {
    name == SchemaName::PUBLIC || name == SchemaName::DEFAULT
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SchemaName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SchemaName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SchemaName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&SchemaName> for SchemaName {
    fn from(s: &SchemaName) -> Self {
        s.clone()
    }
}

/// The tenant a single request is bound to.
///
/// Starts empty, is bound at most once by the resolver, and is dropped with
/// the request. It is a plain value: pass it along explicitly or scope it with
/// [`with_context`](super::task_local::with_context).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    tenant: Option<(TenantId, SchemaName)>,
}

impl TenantContext {
    /// An unbound context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A context bound to the given tenant and schema.
    pub fn new(tenant_id: impl Into<TenantId>, schema: impl Into<SchemaName>) -> Self {
        Self {
            tenant: Some((tenant_id.into(), schema.into())),
        }
    }

    /// Bind the context. Returns `false` and leaves the context untouched if
    /// it is already bound.
    pub fn bind(&mut self, tenant_id: impl Into<TenantId>, schema: impl Into<SchemaName>) -> bool {
        if self.tenant.is_some() {
            return false;
        }
        self.tenant = Some((tenant_id.into(), schema.into()));
        true
    }

    /// Whether a tenant is bound.
    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }

    /// The bound tenant identifier.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant.as_ref().map(|(id, _)| id)
    }

    /// The bound schema name.
    pub fn schema_name(&self) -> Option<&SchemaName> {
        self.tenant.as_ref().map(|(_, schema)| schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_creation() {
        let id1 = TenantId::new("tenant-123");
        assert_eq!(id1.as_str(), "tenant-123");

        let id2: TenantId = "tenant-456".into();
        assert_eq!(id2.to_string(), "tenant-456");
    }

    #[test]
    fn test_reserved_schemas() {
        assert!(SchemaName::new("public").is_reserved());
        assert!(SchemaName::new("default").is_reserved());
        assert!(!SchemaName::new("tenant_public").is_reserved());
        assert!(!SchemaName::new("Public").is_reserved());
    }

    #[test]
    fn test_quoted_identifier() {
        assert_eq!(SchemaName::new("tenant_a").quoted(), "\"tenant_a\"");
        assert_eq!(SchemaName::new("we\"ird").quoted(), "\"we\"\"ird\"");
    }

    #[test]
    fn test_empty_context() {
        let ctx = TenantContext::empty();
        assert!(!ctx.has_tenant());
        assert!(ctx.tenant_id().is_none());
        assert!(ctx.schema_name().is_none());
    }

    #[test]
    fn test_bind_once() {
        let mut ctx = TenantContext::empty();
        assert!(ctx.bind("acme", "tenant_acme"));
        assert!(!ctx.bind("globex", "tenant_globex"));

        assert_eq!(ctx.tenant_id().unwrap().as_str(), "acme");
        assert_eq!(ctx.schema_name().unwrap().as_str(), "tenant_acme");
    }
}
