//! Tenant records and the storage seam they are read through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::context::TenantId;
use super::naming::SchemaNamingStrategy;
use crate::error::TenancyResult;

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// The tenant may be served.
    #[default]
    Active,
    /// The tenant exists but is switched off.
    Inactive,
    /// The tenant is blocked, typically for billing reasons.
    Suspended,
}

/// A persisted tenant, as owned by the tenant administration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    /// Primary key.
    pub id: String,
    /// Externally visible code the tenant is looked up by.
    pub code: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: TenantStatus,
    /// Entity or preset names enabled for this tenant. `None` means "use the
    /// registry defaults".
    #[serde(default)]
    pub enabled_entities: Option<Vec<String>>,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantRecord {
    /// Create an active record.
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            name: None,
            status: TenantStatus::Active,
            enabled_entities: None,
            deleted_at: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the enabled entity list.
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_entities = Some(entities.into_iter().map(Into::into).collect());
        self
    }

    /// Mark as soft-deleted.
    pub fn deleted(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(at);
        self
    }

    /// Whether the record was soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Active and not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active && !self.is_deleted()
    }
}

/// Read access to persisted tenant records.
///
/// Implement this with your database of choice; the administration side
/// (create, update, delete) lives elsewhere.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Find a tenant by its lookup code.
    async fn find_by_code(&self, code: &str) -> TenancyResult<Option<TenantRecord>>;
}

/// An in-memory tenant store.
///
/// When built with a naming strategy, every record is also reachable under
/// the schema name derived from its code, so pool lookups keyed by schema
/// find it.
#[derive(Clone, Default)]
pub struct InMemoryTenantStore {
    records: Arc<RwLock<HashMap<String, TenantRecord>>>,
    aliases: Arc<RwLock<HashMap<String, String>>>,
    naming: Option<Arc<dyn SchemaNamingStrategy>>,
}

impl InMemoryTenantStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also index records by their derived schema name.
    pub fn with_naming(mut self, naming: Arc<dyn SchemaNamingStrategy>) -> Self {
        self.naming = Some(naming);
        self
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: TenantRecord) -> &Self {
        if let Some(naming) = &self.naming {
            let schema = naming.schema_name(&TenantId::new(record.code.clone()));
            if schema.as_str() != record.code {
                self.aliases
                    .write()
                    .insert(schema.into_inner(), record.code.clone());
            }
        }
        self.records.write().insert(record.code.clone(), record);
        self
    }

    /// Remove a record by code.
    pub fn remove(&self, code: &str) -> Option<TenantRecord> {
        self.aliases.write().retain(|_, target| target != code);
        self.records.write().remove(code)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InMemoryTenantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTenantStore")
            .field("records", &self.len())
            .field("indexes_schema_names", &self.naming.is_some())
            .finish()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_by_code(&self, code: &str) -> TenancyResult<Option<TenantRecord>> {
        let records = self.records.read();
        if let Some(record) = records.get(code) {
            return Ok(Some(record.clone()));
        }
        let target = self.aliases.read().get(code).cloned();
        Ok(target.and_then(|code| records.get(&code).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::naming::DefaultSchemaNaming;

    #[test]
    fn test_record_activity() {
        let record = TenantRecord::new("1", "acme");
        assert!(record.is_active());

        let record = TenantRecord::new("1", "acme").with_status(TenantStatus::Suspended);
        assert!(!record.is_active());

        let record = TenantRecord::new("1", "acme").deleted(Utc::now());
        assert!(record.is_deleted());
        assert!(!record.is_active());
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{"id":"1","code":"acme","status":"inactive","enabledEntities":["users"]}"#;
        let record: TenantRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, TenantStatus::Inactive);
        assert_eq!(record.enabled_entities, Some(vec!["users".to_string()]));
        assert!(record.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_store_lookup_by_code() {
        let store = InMemoryTenantStore::new();
        store.insert(TenantRecord::new("1", "acme"));

        assert!(store.find_by_code("acme").await.unwrap().is_some());
        assert!(store.find_by_code("tenant_acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_lookup_by_schema_name() {
        let store = InMemoryTenantStore::new().with_naming(Arc::new(DefaultSchemaNaming));
        store.insert(TenantRecord::new("1", "Acme-1"));

        let found = store.find_by_code("tenant_acme_1").await.unwrap();
        assert_eq!(found.unwrap().code, "Acme-1");

        store.remove("Acme-1");
        assert!(store.find_by_code("tenant_acme_1").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
