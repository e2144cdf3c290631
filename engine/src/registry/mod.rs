//! Mapping registry - read-only view of the mapping store
//!
//! The store is `mappings.json` in the configuration directory: a JSON
//! object keyed by mapping id. Editing the store is the dashboard's job;
//! here mappings are only loaded, validated and looked up.
//!
//! A broken entry does not take the store down: it is kept aside with its
//! reason and reported when asked for by id.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, RegistryResult};
use crate::transform::dsl::MappingConfig;

/// File name of the store inside the configuration directory
pub const MAPPINGS_FILE: &str = "mappings.json";

/// Store entry that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntry {
    pub id: String,
    pub reason: String,
}

/// Loaded mappings, in store order
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    /// Store file the mappings came from
    path: Option<PathBuf>,
    mappings: Vec<MappingConfig>,
    invalid: Vec<InvalidEntry>,
}

impl MappingRegistry {
    /// Load `{config_dir}/mappings.json`. A missing store is an empty
    /// registry.
    pub fn load(config_dir: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = config_dir.as_ref().join(MAPPINGS_FILE);
        if !path.exists() {
            return Ok(Self { path: Some(path), ..Default::default() });
        }

        let content = fs::read_to_string(&path)?;
        let mut registry = Self::from_json(&content)?;
        registry.path = Some(path);
        Ok(registry)
    }

    /// Parse a store document. Every mapping is validated; invalid ones are
    /// set aside, only a malformed document fails.
    pub fn from_json(json: &str) -> RegistryResult<Self> {
        let store: Map<String, Value> = serde_json::from_str(json)?;

        let mut registry = Self::default();
        for (id, value) in store {
            match MappingConfig::from_value(value) {
                Ok(mut mapping) => {
                    if mapping.id.as_deref().map_or(true, str::is_empty) {
                        mapping.id = Some(id);
                    }
                    registry.mappings.push(mapping);
                }
                Err(err) => registry.invalid.push(InvalidEntry { id, reason: err.to_string() }),
            }
        }
        Ok(registry)
    }

    /// Store file, when loaded from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All mappings, in store order
    pub fn list(&self) -> &[MappingConfig] {
        &self.mappings
    }

    /// Entries that failed validation, in store order
    pub fn invalid(&self) -> &[InvalidEntry] {
        &self.invalid
    }

    /// Get a mapping by ID
    pub fn get(&self, id: &str) -> RegistryResult<&MappingConfig> {
        if let Some(mapping) = self.mappings.iter().find(|m| m.id.as_deref() == Some(id)) {
            return Ok(mapping);
        }
        match self.invalid.iter().find(|e| e.id == id) {
            Some(entry) => Err(RegistryError::InvalidMapping {
                id: entry.id.clone(),
                reason: entry.reason.clone(),
            }),
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// Mappings reading the given source spec
    pub fn for_source(&self, source_id: &str) -> Vec<&MappingConfig> {
        self.mappings
            .iter()
            .filter(|m| m.source_id.as_deref() == Some(source_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::dsl::example_mapping;
    use serde_json::json;
    use tempfile::tempdir;

    fn store() -> Value {
        json!({
            "revolut_stocks_to_ghostfolio": serde_json::to_value(example_mapping()).unwrap(),
            "revolut_crypto_to_ghostfolio": {
                "name": "Revolut Crypto → Ghostfolio",
                "source_id": "revolut_crypto",
                "destination_id": "ghostfolio",
                "field_mappings": [
                    {"destination_field": "date", "source_field": "Date", "transform_type": "date_format",
                     "transform_config": {"input_format": "%b %d, %Y, %I:%M:%S %p"}},
                    {"destination_field": "symbol", "source_field": "Symbol", "transform_type": "suffix",
                     "transform_config": {"value": "-USD"}},
                    {"destination_field": "type", "source_field": "Type", "transform_type": "lookup",
                     "transform_config": {"Buy": "BUY", "Sell": "SELL", "_default": null}}
                ],
                "filter_rules": []
            }
        })
    }

    #[test]
    fn test_from_json_fills_ids() {
        let registry = MappingRegistry::from_json(&store().to_string()).unwrap();
        assert_eq!(registry.len(), 2);

        let crypto = registry.get("revolut_crypto_to_ghostfolio").unwrap();
        assert_eq!(crypto.id.as_deref(), Some("revolut_crypto_to_ghostfolio"));
        assert_eq!(crypto.field_mappings.len(), 3);

        let ids: Vec<&str> = registry.list().iter().filter_map(|m| m.id.as_deref()).collect();
        assert_eq!(ids, vec!["revolut_stocks_to_ghostfolio", "revolut_crypto_to_ghostfolio"]);
    }

    #[test]
    fn test_for_source() {
        let registry = MappingRegistry::from_json(&store().to_string()).unwrap();
        let found = registry.for_source("revolut_stocks");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Revolut Stocks → Ghostfolio");
        assert!(registry.for_source("degiro").is_empty());
    }

    #[test]
    fn test_get_missing() {
        let registry = MappingRegistry::from_json("{}").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_invalid_entries_do_not_hide_valid_ones() {
        let mut store = store();
        store["broken"] = json!({"name": "b", "field_mappings": []});
        store["dashboard_contains"] = json!({
            "name": "Dashboard",
            "field_mappings": [{"destination_field": "symbol", "source_field": "Ticker"}],
            "filter_rules": [
                {"field": "Type", "operator": "contains", "values": ["FEE", "TAX"], "value": null}
            ]
        });
        store["dashboard_single"] = json!({
            "name": "Dashboard single",
            "field_mappings": [{"destination_field": "symbol", "source_field": "Ticker"}],
            "filter_rules": [
                {"field": "Type", "operator": "contains", "values": ["FEE"], "value": null}
            ]
        });

        let registry = MappingRegistry::from_json(&store.to_string()).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("revolut_stocks_to_ghostfolio").is_ok());
        assert_eq!(
            registry.get("dashboard_single").unwrap().filter_rules[0].value.as_deref(),
            Some("FEE")
        );

        let broken: Vec<&str> = registry.invalid().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(broken, vec!["broken", "dashboard_contains"]);

        match registry.get("broken") {
            Err(RegistryError::InvalidMapping { id, reason }) => {
                assert_eq!(id, "broken");
                assert!(reason.contains("has no field mappings"));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            registry.get("dashboard_contains"),
            Err(RegistryError::InvalidMapping { .. })
        ));
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempdir().unwrap();
        let empty = MappingRegistry::load(dir.path()).unwrap();
        assert!(empty.is_empty());

        fs::write(dir.path().join(MAPPINGS_FILE), store().to_string()).unwrap();
        let registry = MappingRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.path(), Some(dir.path().join(MAPPINGS_FILE).as_path()));
    }

    #[test]
    fn test_load_malformed_store() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MAPPINGS_FILE), "[1, 2]").unwrap();
        assert!(matches!(MappingRegistry::load(dir.path()), Err(RegistryError::JsonError(_))));
    }
}
