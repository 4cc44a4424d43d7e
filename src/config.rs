use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha512};
use tracing::{info, warn};

pub const DEFAULT_SERVER_PORT: u16 = 9019;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_CONFIG_SCAN_PERIOD_MS: u64 = 5000;
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

pub const ENV_HOME: &str = "DATASOURCE_BRIDGE_HOME";

/// Contents of `config/server.json`, read once at boot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub server_port: u16,
    pub request_timeout: u64,
    pub query_timeout: u64,
    pub config_scan_period: u64,
    pub worker_pool_size: usize,
    /// Extra datasource type registrations; entries the build does not know
    /// are reported and skipped.
    pub datasources: Option<Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_port: DEFAULT_SERVER_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_MS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_MS,
            config_scan_period: DEFAULT_CONFIG_SCAN_PERIOD_MS,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            datasources: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Self {
        info!("Loading configuration from [{}]...", path.display());

        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<ServerConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse [{}]: {e}", path.display());
                    ServerConfig::default()
                }
            },
            Err(e) => {
                warn!("Failed to read [{}]: {e}", path.display());
                ServerConfig::default()
            }
        };

        // a query is allowed at least as much time as any other request
        config.query_timeout = config.query_timeout.max(config.request_timeout);
        config
    }
}

/// Base directory holding `config/`, from `DATASOURCE_BRIDGE_HOME` or the
/// working directory.
pub fn home_dir() -> PathBuf {
    std::env::var(ENV_HOME).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Loads every `*.json` file in a directory, each holding a map of
/// id → config object, and merges them into one map. Malformed files and
/// non-object entries are skipped with a warning; a missing directory is an
/// empty configuration.
pub fn load_config_dir(dir: &Path) -> HashMap<String, Value> {
    let mut merged = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Not able to read configuration from [{}]: {e}", dir.display());
            return merged;
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    for file in files {
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read [{}]: {e}", file.display());
                continue;
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => {
                for (id, entry) in map {
                    if entry.is_object() {
                        merged.insert(id, entry);
                    } else {
                        warn!("Skipping non-object entry [{id}] in [{}]", file.display());
                    }
                }
            }
            Ok(_) => warn!("Skipping [{}]: top level is not an object", file.display()),
            Err(e) => warn!("Failed to parse [{}]: {e}", file.display()),
        }
    }

    merged
}

/// Stable hex digest of a configuration object. serde_json keeps object keys
/// sorted, so semantically equal configurations hash equally regardless of
/// the order they were written in.
pub fn digest_json(value: &Value) -> String {
    digest_str(&value.to_string())
}

pub fn digest_str(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }

    let mut hasher = Sha512::new();
    hasher.update(s.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b": {"x": "y"}, "a": 1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 1, "b": {"x": "y"}}"#).unwrap();
        assert_eq!(digest_json(&a), digest_json(&b));
        assert_ne!(digest_json(&a), digest_json(&json!({"a": "1", "b": {"x": "y"}})));
        assert_eq!(digest_str(""), "");
    }

    #[test]
    fn server_config_clamps_query_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"serverPort": 9020, "requestTimeout": 10000, "queryTimeout": 5}"#).unwrap();

        let config = ServerConfig::load(&path);
        assert_eq!(config.server_port, 9020);
        assert_eq!(config.query_timeout, 10000);

        let missing = ServerConfig::load(&dir.path().join("nope.json"));
        assert_eq!(missing.server_port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn config_dir_merges_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"one": {"query": "select 1"}}"#).unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"two": {"query": "select 2"}, "bad": 3}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{oops").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "x").unwrap();

        let merged = load_config_dir(dir.path());
        assert_eq!(merged.len(), 2);
        assert!(merged.contains_key("one"));
        assert!(merged.contains_key("two"));

        assert!(load_config_dir(&dir.path().join("missing")).is_empty());
    }
}
