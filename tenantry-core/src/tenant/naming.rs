//! Mapping tenant identifiers to schema names.

use std::fmt;
use std::sync::Arc;

use super::context::{SchemaName, TenantId, is_reserved};

/// Maps a tenant identifier to the schema holding its tables.
///
/// Implementations must be pure: the same identifier always yields the same
/// schema name.
pub trait SchemaNamingStrategy: Send + Sync {
    /// Compute the schema name for a tenant.
    fn schema_name(&self, tenant_id: &TenantId) -> SchemaName;
}

/// The default naming strategy.
///
/// Reserved names (`public`, `default`) map to themselves. Anything else is
/// lower-cased, every non-alphanumeric character becomes `_`, and the result
/// is prefixed with `tenant_`.
///
/// ```rust
/// use tenantry_core::tenant::{DefaultSchemaNaming, SchemaNamingStrategy, TenantId};
///
/// let naming = DefaultSchemaNaming;
/// assert_eq!(naming.schema_name(&TenantId::new("Acme-1")).as_str(), "tenant_acme_1");
/// assert_eq!(naming.schema_name(&TenantId::new("default")).as_str(), "default");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSchemaNaming;

impl DefaultSchemaNaming {
    /// Prefix applied to every non-reserved tenant schema.
    pub const PREFIX: &'static str = "tenant_";
}

impl SchemaNamingStrategy for DefaultSchemaNaming {
    fn schema_name(&self, tenant_id: &TenantId) -> SchemaName {
        let id = tenant_id.as_str();
        if is_reserved(id) {
            return SchemaName::new(id);
        }

        let mut name = String::with_capacity(Self::PREFIX.len() + id.len());
        name.push_str(Self::PREFIX);
        name.extend(id.to_lowercase().chars().map(|c| {
            if c.is_ascii_alphanumeric() { c } else { '_' }
        }));
        SchemaName::new(name)
    }
}

/// A naming strategy backed by a host-supplied function.
#[derive(Clone)]
pub struct CustomSchemaNaming {
    naming_fn: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl CustomSchemaNaming {
    /// Wrap a naming function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            naming_fn: Arc::new(f),
        }
    }
}

impl fmt::Debug for CustomSchemaNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomSchemaNaming").finish()
    }
}

impl SchemaNamingStrategy for CustomSchemaNaming {
    fn schema_name(&self, tenant_id: &TenantId) -> SchemaName {
        SchemaName::new((self.naming_fn)(tenant_id.as_str()))
    }
}
