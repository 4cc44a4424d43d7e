use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::ch::{ColumnConfig, ColumnList};
use crate::config::digest_json;
use crate::error::{BridgeError, Result};
use crate::query::params::ParamOverrides;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct NamedQueryConfig {
    query: Option<String>,
    columns: Vec<ColumnConfig>,
    parameters: Option<ParamOverrides>,
}

/// A preconfigured query identified by a short name, optionally with pinned
/// column metadata and parameters. The query text may also be a path to a
/// saved `.query`/`.sql` file, loaded on use.
#[derive(Debug, Clone)]
pub struct NamedQuery {
    id: String,
    digest: String,
    query: String,
    columns: ColumnList,
    parameters: ParamOverrides,
}

impl NamedQuery {
    pub fn from_config(id: &str, config: &Value) -> Result<Self> {
        let parsed: NamedQueryConfig = serde_json::from_value(config.clone())?;
        let query = parsed
            .query
            .ok_or_else(|| BridgeError::config(format!("named query [{id}] has no query")))?;

        Ok(NamedQuery {
            id: id.to_string(),
            digest: digest_json(config),
            query,
            columns: ColumnList::from_configs(&parsed.columns),
            parameters: parsed.parameters.unwrap_or_default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn has_column(&self) -> bool {
        self.columns.has_column()
    }

    pub fn columns(&self) -> &ColumnList {
        &self.columns
    }

    pub fn parameters(&self) -> &ParamOverrides {
        &self.parameters
    }

    pub fn is_different_from(&self, new_digest: &str) -> bool {
        let different = self.digest.is_empty() || self.digest != new_digest;
        if different {
            info!(
                "Query configuration of [{}] is changed from [{}] to [{}]",
                self.id, self.digest, new_digest
            );
        } else {
            debug!("Query configuration of [{}] remains the same", self.id);
        }
        different
    }
}

/// Keyed map of configured named queries, rebuilt on configuration change.
/// Entries whose canonical JSON is unchanged keep their existing instance.
#[derive(Debug, Default)]
pub struct NamedQueryRegistry {
    mappings: RwLock<HashMap<String, Arc<NamedQuery>>>,
}

impl NamedQueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query: &str) -> Option<Arc<NamedQuery>> {
        self.mappings.read().expect("named query registry lock").get(query).cloned()
    }

    pub fn reload(&self, config: &HashMap<String, Value>) {
        let mut mappings = self.mappings.write().expect("named query registry lock");

        if config.is_empty() {
            if !mappings.is_empty() {
                info!("No query configuration found, which is fine");
            }
            mappings.clear();
            return;
        }

        for (id, entry) in config {
            let unchanged = mappings
                .get(id)
                .is_some_and(|existing| !existing.is_different_from(&digest_json(entry)));
            if unchanged {
                continue;
            }

            info!("Adding query [{id}]...");
            match NamedQuery::from_config(id, entry) {
                Ok(query) => {
                    mappings.insert(id.clone(), Arc::new(query));
                }
                Err(e) => error!("Failed to add query [{id}]: {e}"),
            }
        }

        mappings.retain(|id, _| {
            let keep = config.contains_key(id);
            if !keep {
                info!("Removing query [{id}]...");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> HashMap<String, Value> {
        value.as_object().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    #[test]
    fn reload_adds_and_removes() {
        let registry = NamedQueryRegistry::new();
        registry.reload(&config(json!({
            "t": {"query": "select 1", "columns": [{"name": "a", "type": "UInt32", "nullable": false}]}
        })));

        let q = registry.get("t").unwrap();
        assert_eq!(q.query(), "select 1");
        assert!(q.has_column());
        assert_eq!(q.columns().to_string(), "columns format version: 1\n1 columns:\n`a` UInt32\n");

        registry.reload(&HashMap::new());
        assert!(registry.get("t").is_none());
    }

    #[test]
    fn reload_with_same_digest_keeps_instance() {
        let registry = NamedQueryRegistry::new();
        let cfg = config(json!({"t": {"query": "select 1"}}));

        registry.reload(&cfg);
        let first = registry.get("t").unwrap();
        registry.reload(&cfg);
        let second = registry.get("t").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn entries_without_query_are_skipped() {
        let registry = NamedQueryRegistry::new();
        registry.reload(&config(json!({"bad": {"columns": []}, "good": {"query": "select 2"}})));
        assert!(registry.get("bad").is_none());
        assert!(registry.get("good").is_some());
    }
}
