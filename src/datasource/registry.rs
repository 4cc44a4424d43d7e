use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::digest_json;
use crate::datasource::{jenkins, sql, DataSource, GeneralDataSource};
use crate::error::{BridgeError, Result};
use crate::resolver::NameResolver;

/// Builds a data source from `(id, resolver, config)`; `config` is `None`
/// for adhoc sources created straight from a connection string.
pub type SourceFactory =
    Arc<dyn Fn(&str, &Arc<dyn NameResolver>, Option<&Value>) -> Result<Arc<dyn DataSource>> + Send + Sync>;

/// Keyed map of configured data sources with pluggable source types.
///
/// Readers grab an `Arc` handle under a short read lock, so a concurrent
/// reload never tears an in-flight query: a replaced or removed source lives
/// on until its last handle is dropped, and `close` is idempotent.
pub struct DataSourceRegistry {
    resolver: Arc<dyn NameResolver>,
    types: RwLock<HashMap<String, SourceFactory>>,
    sources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new(resolver: Arc<dyn NameResolver>) -> Self {
        let registry = DataSourceRegistry {
            resolver,
            types: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        };

        registry.register_type(sql::DATASOURCE_TYPE, sql::factory());
        registry.register_type(jenkins::DATASOURCE_TYPE, jenkins::factory());
        registry
    }

    pub fn register_type(&self, name: &str, factory: SourceFactory) {
        info!("Registering new type of data source: [{name}]");
        self.types.write().expect("registry type lock").insert(name.to_string(), factory);
    }

    /// Handles the `datasources` block of server.json. Type registration is
    /// compiled in; entries naming anything else are reported and skipped.
    pub fn register_types(&self, config: Option<&Value>) {
        let Some(map) = config.and_then(Value::as_object) else {
            return;
        };

        let types = self.types.read().expect("registry type lock");
        for (name, implementation) in map {
            if types.contains_key(name) {
                debug!("Type [{name}] is built in");
            } else {
                warn!("Not able to register type [{name}] backed by [{implementation}]");
            }
        }
    }

    /// Expands `{{name}}` / `{{host:name}}` / `{{port:name}}` placeholders
    /// through the registry's name resolver.
    pub fn resolve(&self, template: &str) -> String {
        self.resolver.resolve(template)
    }

    /// Applies a freshly loaded configuration: new or changed entries are
    /// rebuilt, entries missing from the new configuration are dropped.
    /// Reloading an identical configuration is a no-op.
    pub fn reload(&self, config: &HashMap<String, Value>) {
        let mut retired: Vec<Arc<dyn DataSource>> = Vec::new();

        {
            let mut sources = self.sources.write().expect("registry source lock");

            if config.is_empty() {
                if !sources.is_empty() {
                    info!("No datasource configuration found, which is fine");
                    for id in sources.keys() {
                        info!("Removing datasource [{id}]...");
                    }
                }
                retired.extend(sources.drain().map(|(_, ds)| ds));
            } else {
                for (id, entry) in config {
                    let unchanged = sources
                        .get(id)
                        .is_some_and(|existing| !existing.is_different_from(&digest_json(entry)));
                    if unchanged {
                        continue;
                    }

                    info!("Adding datasource [{id}]...");
                    match self.create_from_config(id, entry) {
                        Ok(ds) => {
                            if let Some(old) = sources.insert(id.clone(), ds) {
                                retired.push(old);
                            }
                        }
                        Err(e) => error!("Failed to add datasource [{id}]: {e}"),
                    }
                }

                let removed: Vec<String> =
                    sources.keys().filter(|id| !config.contains_key(*id)).cloned().collect();
                for id in removed {
                    info!("Removing datasource [{id}]...");
                    if let Some(ds) = sources.remove(&id) {
                        retired.push(ds);
                    }
                }
            }
        }

        // close outside the lock; a retired source closes gracefully once its
        // in-flight queries return their connections
        for ds in retired {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { ds.close().await });
            }
        }
    }

    /// Resolves a connection string of the form
    /// `[<type>:]<id or connection string>[?<query parameters>]` to a data
    /// source handle. Unknown ids fail unless the type is registered and
    /// `auto_create` permits an adhoc source.
    pub fn get(&self, uri: &str, auto_create: bool) -> Result<Arc<dyn DataSource>> {
        let mut id = uri;

        if let Some((head, _)) = id.split_once('?') {
            id = head;
        }

        let mut type_name = None;
        if let Some((prefix, rest)) = id.split_once(':') {
            type_name = Some(prefix);
            id = rest;
        }

        if let Some(host) = uri_host(id) {
            id = host;
        }

        if let Some(ds) = self.sources.read().expect("registry source lock").get(id) {
            return Ok(Arc::clone(ds));
        }

        if auto_create {
            let factory = type_name
                .and_then(|t| self.types.read().expect("registry type lock").get(t).cloned());
            if let Some(factory) = factory {
                debug!("Creating adhoc datasource for [{uri}]...");
                return factory(uri, &self.resolver, None);
            }
        }

        Err(BridgeError::UnknownSource(uri.to_string()))
    }

    fn create_from_config(&self, id: &str, raw: &Value) -> Result<Arc<dyn DataSource>> {
        if let Some(type_name) = raw.get("type").and_then(Value::as_str) {
            let factory = self.types.read().expect("registry type lock").get(type_name).cloned();
            match factory {
                Some(factory) => return factory(id, &self.resolver, Some(raw)),
                None => warn!("Unknown type [{type_name}] of datasource [{id}]"),
            }
        }

        // could it be a SQL data source?
        if raw.get("url").is_some() || raw.get("jdbcUrl").is_some() {
            let factory = self
                .types
                .read()
                .expect("registry type lock")
                .get(sql::DATASOURCE_TYPE)
                .cloned();
            if let Some(factory) = factory {
                return factory(id, &self.resolver, Some(raw));
            }
        }

        // fall back to default implementation
        Ok(Arc::new(GeneralDataSource::new(id, Some(raw))))
    }
}

/// Host portion of a URI-like string, used as the registry key so that
/// `mysql://db1.internal:3306/x` finds a source named `db1.internal`.
fn uri_host(s: &str) -> Option<&str> {
    let (_, rest) = s.split_once("//")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.rsplit_once(':').map_or(host, |(h, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            host
        }
    });

    (!host.is_empty()).then_some(host)
}
