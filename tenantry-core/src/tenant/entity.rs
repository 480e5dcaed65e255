//! The entity registry: which tables a tenant connection is scoped to.
//!
//! The registry is built once at startup and shared by reference with every
//! consumer. A tenant record lists entity names and/or preset names; the
//! registry expands presets, drops names it does not know and falls back to
//! its default set when nothing usable remains.
//!
//! ```rust
//! use tenantry_core::tenant::EntityRegistry;
//!
//! let registry = EntityRegistry::builder()
//!     .entity("users", "users")
//!     .entity("orders", "orders")
//!     .entity("invoices", "billing_invoices")
//!     .preset("billing", ["orders", "invoices"])
//!     .defaults(["users"])
//!     .build()
//!     .unwrap();
//!
//! let enabled = vec!["users".to_string(), "billing".to_string()];
//! assert_eq!(registry.resolve(&enabled), ["users", "orders", "invoices"]);
//! assert_eq!(registry.resolve(&[]), ["users"]);
//! ```

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::error::{TenancyError, TenancyResult};

/// A table-backed entity application code may use through a tenant connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    /// Registry name.
    pub name: String,
    /// Physical table name inside the tenant schema.
    pub table: String,
}

/// Registry of entities and presets.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: IndexMap<String, EntityDefinition>,
    presets: IndexMap<String, Vec<String>>,
    defaults: Vec<String>,
}

impl EntityRegistry {
    /// Create a builder.
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    /// Whether a preset with this name exists.
    pub fn has_preset(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    /// The entities used when a tenant configures none.
    pub fn default_entities(&self) -> &[String] {
        &self.defaults
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Expand an enabled list into concrete entity names.
    pub fn resolve(&self, enabled: &[String]) -> Vec<String> {
        let mut resolved: IndexSet<&str> = IndexSet::new();

        for name in enabled {
            if let Some(members) = self.presets.get(name) {
                resolved.extend(members.iter().map(String::as_str));
            } else if self.entities.contains_key(name) {
                resolved.insert(name);
            } else {
                warn!(entity = %name, "Ignoring unknown entity or preset");
            }
        }

        if resolved.is_empty() {
            return self.defaults.clone();
        }
        resolved.into_iter().map(String::from).collect()
    }

    /// Table names for a resolved entity list.
    pub fn tables_for<'a>(&'a self, entities: &'a [String]) -> Vec<&'a str> {
        entities
            .iter()
            .filter_map(|name| self.entities.get(name))
            .map(|def| def.table.as_str())
            .collect()
    }
}

/// Builder for [`EntityRegistry`].
#[derive(Debug, Default)]
pub struct EntityRegistryBuilder {
    entities: IndexMap<String, EntityDefinition>,
    presets: IndexMap<String, Vec<String>>,
    defaults: Vec<String>,
}

impl EntityRegistryBuilder {
    /// Register an entity backed by `table`.
    pub fn entity(mut self, name: impl Into<String>, table: impl Into<String>) -> Self {
        let name = name.into();
        self.entities.insert(
            name.clone(),
            EntityDefinition {
                name,
                table: table.into(),
            },
        );
        self
    }

    /// Register a named group of entities.
    pub fn preset<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.presets
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Set the default entity set.
    pub fn defaults<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults = names.into_iter().map(Into::into).collect();
        self
    }

    /// Build the registry, checking presets and defaults only name known entities.
    pub fn build(self) -> TenancyResult<EntityRegistry> {
        for (preset, members) in &self.presets {
            if self.entities.contains_key(preset) {
                return Err(TenancyError::config(format!(
                    "preset '{}' shadows an entity of the same name",
                    preset
                )));
            }
            if let Some(unknown) = members.iter().find(|m| !self.entities.contains_key(*m)) {
                return Err(TenancyError::config(format!(
                    "preset '{}' references unknown entity '{}'",
                    preset, unknown
                )));
            }
        }

        if let Some(unknown) = self
            .defaults
            .iter()
            .find(|d| !self.entities.contains_key(*d))
        {
            return Err(TenancyError::config(format!(
                "default entity '{}' is not registered",
                unknown
            )));
        }

        Ok(EntityRegistry {
            entities: self.entities,
            presets: self.presets,
            defaults: self.defaults,
        })
    }
}
