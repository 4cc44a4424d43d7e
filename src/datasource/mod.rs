//! Data sources: the generic contract plus the SQL and Jenkins
//! implementations, and the registry that owns them.

pub mod jenkins;
pub mod registry;
pub mod sql;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::TtlCache;
use crate::ch::column::COLUMN_DATASOURCE;
use crate::ch::{ByteBuf, ColumnConfig, ColumnInfo, ColumnList, DataType, DefaultValues};
use crate::config::digest_json;
use crate::error::Result;
use crate::query::{NamedQuery, ParamOverrides, QueryParameters};
use crate::streaming::ResponseWriter;

pub use registry::DataSourceRegistry;

// See supported values in ClickHouse's IdentifierQuotingStyle
pub const DEFAULT_QUOTE_IDENTIFIER: &str = "`";

const GENERAL_TYPE: &str = "general";

pub(crate) const QUERY_FILE_EXT: &str = ".query";

const DEFAULT_CACHE_SIZE: usize = 100;
const DEFAULT_CACHE_EXPIRATION_MINUTES: u64 = 5;

/// serde model for one entry of `config/datasources/*.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    #[serde(alias = "jdbcUrl")]
    pub url: Option<String>,
    #[serde(rename = "dataSource")]
    pub driver_properties: HashMap<String, Value>,
    pub timezone: Option<String>,
    pub cache: Option<CacheConfig>,
    pub columns: Vec<ColumnConfig>,
    pub defaults: Option<Value>,
    pub parameters: Option<ParamOverrides>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub columns: Option<CacheSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub size: usize,
    /// access expiration in minutes
    pub expiration: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings { size: DEFAULT_CACHE_SIZE, expiration: DEFAULT_CACHE_EXPIRATION_MINUTES }
    }
}

impl DataSourceConfig {
    pub fn from_value(id: &str, raw: &Value) -> Self {
        serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
            warn!("Malformed configuration of datasource [{id}]: {e}");
            DataSourceConfig::default()
        })
    }
}

/// State shared by every data source implementation: identity, configuration
/// digest, per-source defaults and the columns-inference cache.
#[derive(Debug)]
pub struct SourceCore {
    pub id: String,
    pub digest: String,
    pub timezone: Option<Tz>,
    pub custom_columns: Vec<ColumnInfo>,
    pub defaults: DefaultValues,
    pub parameters: QueryParameters,
    columns_cache: TtlCache<String, ColumnList>,
}

impl SourceCore {
    pub fn new(id: &str, raw: Option<&Value>) -> Self {
        let digest = raw.map(digest_json).unwrap_or_default();
        let config = raw.map(|raw| DataSourceConfig::from_value(id, raw)).unwrap_or_default();
        Self::from_config(id, digest, &config)
    }

    pub fn from_config(id: &str, digest: String, config: &DataSourceConfig) -> Self {
        let timezone = config.timezone.as_deref().and_then(|tz| {
            tz.parse::<Tz>()
                .map_err(|_| warn!("Ignoring unknown timezone [{tz}] of datasource [{id}]"))
                .ok()
        });

        let cache = config.cache.as_ref().and_then(|c| c.columns.clone()).unwrap_or_default();

        let mut parameters = QueryParameters::default();
        if let Some(overrides) = &config.parameters {
            parameters.apply(overrides);
        }

        SourceCore {
            id: id.to_string(),
            digest,
            timezone,
            custom_columns: config.columns.iter().map(ColumnInfo::from_config).collect(),
            defaults: DefaultValues::from_config(config.defaults.as_ref()),
            parameters,
            columns_cache: TtlCache::new(cache.size, Duration::from_secs(cache.expiration * 60)),
        }
    }
}

/// A queryable backend. Implementations provide column inference and the row
/// streaming loop; identity, caching, parameter layering and named-query
/// remapping are shared.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn core(&self) -> &SourceCore;

    fn source_type(&self) -> &'static str {
        GENERAL_TYPE
    }

    fn is_saved_query(&self, file: &str) -> bool {
        file.ends_with(QUERY_FILE_EXT)
    }

    async fn quote_identifier(&self) -> String {
        DEFAULT_QUOTE_IDENTIFIER.to_string()
    }

    async fn infer_columns(&self, _schema: &str, _query: &str) -> Result<ColumnList> {
        Ok(ColumnList::default_columns_info())
    }

    async fn execute_query(
        &self,
        query: &str,
        columns: &ColumnList,
        params: &QueryParameters,
        writer: &mut ResponseWriter,
    ) -> Result<()> {
        info!("Executing query:\n{query}");
        let _ = columns;

        write_debug_info(&self.id(), self.source_type(), None, query, Some(params), writer).await
    }

    /// Reserved: mutations are acknowledged and discarded.
    async fn execute_write(
        &self,
        schema: &str,
        table: &str,
        _columns: &ColumnList,
        _params: &QueryParameters,
    ) -> Result<()> {
        info!("Discard mutation: schema=[{schema}], table=[{table}]");
        Ok(())
    }

    /// Releases backend resources. Idempotent; in-flight queries keep the
    /// source alive through their own handle until they finish.
    async fn close(&self) {
        info!("Closing datasource [{}]", self.id());
    }

    fn id(&self) -> String {
        self.core().id.clone()
    }

    fn timezone(&self) -> Option<Tz> {
        self.core().timezone
    }

    fn custom_columns(&self) -> &[ColumnInfo] {
        &self.core().custom_columns
    }

    fn default_values(&self) -> &DefaultValues {
        &self.core().defaults
    }

    fn is_different_from(&self, new_digest: &str) -> bool {
        let core = self.core();
        let different = core.digest.is_empty() || core.digest != new_digest;
        if different {
            info!(
                "Datasource configuration of [{}] is changed from [{}] to [{}]",
                core.id, core.digest, new_digest
            );
        } else {
            info!("Datasource configuration of [{}] remains the same", core.id);
        }
        different
    }

    /// Effective parameters for a request: framework defaults, this source's
    /// configuration, then the caller's explicit overrides.
    fn new_query_parameters(&self, overrides: &[&ParamOverrides]) -> QueryParameters {
        let mut params = self.core().parameters.clone();
        for o in overrides {
            params.apply(o);
        }
        params
    }

    /// When the query is a path to a saved `.query`/`.sql` file, replaces it
    /// with the file contents.
    async fn load_saved_query_as_needed(&self, query: &str) -> String {
        if !query.contains('\n') && self.is_saved_query(query) {
            if let Ok(content) = tokio::fs::read_to_string(query).await {
                info!("Loaded query from file [{query}]");
                return content;
            }
        }

        query.to_string()
    }

    /// Column list for the rows the query will produce, backed by the
    /// per-source cache.
    async fn get_columns(&self, schema: &str, query: &str) -> Result<ColumnList> {
        let key = query.to_string();
        if let Some(columns) = self.core().columns_cache.get(&key) {
            return Ok(columns);
        }

        let loaded = self.load_saved_query_as_needed(query).await;
        let columns = self.infer_columns(schema, &loaded).await?;
        self.core().columns_cache.insert(key, columns.clone());
        Ok(columns)
    }

    /// Executes a named query. The request may ask for a subset of the named
    /// query's columns in any order, so each requested column is remapped to
    /// its position in the backing result before streaming.
    async fn execute_named_query(
        &self,
        named: &NamedQuery,
        request_columns: &ColumnList,
        params: &QueryParameters,
        writer: &mut ResponseWriter,
    ) -> Result<()> {
        let mut additional: Vec<ColumnInfo> = Vec::new();
        if params.show_datasource_column {
            additional.push(
                ColumnInfo::new(COLUMN_DATASOURCE, DataType::String, true, 0, 0)
                    .with_default_value(Some(self.id())),
            );
        }
        if params.show_custom_columns {
            additional.extend_from_slice(self.custom_columns());
        }

        let mut request_columns = request_columns.clone();
        request_columns.update_values(&additional);

        let all = named.columns();
        for i in additional.len()..request_columns.size() {
            let name = request_columns.column(i).name.clone();
            if let Some(position) = all.position(&name) {
                request_columns.column_mut(i).set_index(position);
            }
        }

        let query = self.load_saved_query_as_needed(named.query()).await;
        self.execute_query(&query, &request_columns, params, writer).await
    }
}

impl fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id())
            .field("source_type", &self.source_type())
            .finish()
    }
}

/// Single synthetic row describing the datasource, served when `debug=true`:
/// `(datasource, type, definition, query, parameters)`, all nullable strings.
pub async fn write_debug_info(
    id: &str,
    source_type: &str,
    metadata: Option<&ColumnList>,
    query: &str,
    params: Option<&QueryParameters>,
    writer: &mut ResponseWriter,
) -> Result<()> {
    let definition = metadata.cloned().unwrap_or_default().to_json_string(Some(query));
    let params = params.map(QueryParameters::to_query_string);

    let mut buf = ByteBuf::new(query.len() * 2);
    for value in [Some(id), Some(source_type), Some(definition.as_str()), Some(query), params.as_deref()] {
        match value {
            Some(value) => {
                buf.write_non_null().write_string(value);
            }
            None => {
                buf.write_null();
            }
        }
    }

    writer.write(buf).await
}

/// Fallback source used when a configuration names no known type and carries
/// no connection URL. Answers every query with the debug row.
pub struct GeneralDataSource {
    core: SourceCore,
}

impl GeneralDataSource {
    pub fn new(id: &str, raw: Option<&Value>) -> Self {
        GeneralDataSource { core: SourceCore::new(id, raw) }
    }
}

#[async_trait]
impl DataSource for GeneralDataSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::StreamOptions;
    use serde_json::json;

    #[test]
    fn core_parses_configuration() {
        let raw = json!({
            "type": "general",
            "timezone": "Asia/Shanghai",
            "cache": {"columns": {"size": 10, "expiration": 1}},
            "columns": [
                {"name": "c_uint32", "type": "UInt32", "nullable": false, "value": 2},
                {"name": "c_string", "type": "String", "value": "2"}
            ],
            "defaults": {"Int32": 3, "Float64": 3.0},
            "parameters": {"max_rows": 100}
        });

        let core = SourceCore::new("test-datasource", Some(&raw));
        assert_eq!(core.id, "test-datasource");
        assert!(!core.digest.is_empty());
        assert_eq!(core.timezone, Some(chrono_tz::Asia::Shanghai));
        assert_eq!(core.custom_columns.len(), 2);
        assert_eq!(core.custom_columns[0].default_value.as_deref(), Some("2"));
        assert_eq!(core.defaults.get(DataType::Int32).as_int(), 3);
        assert_eq!(core.parameters.max_rows, 100);
        assert_eq!(core.parameters.fetch_size, crate::query::params::DEFAULT_FETCH_SIZE);
    }

    #[tokio::test]
    async fn general_source_answers_with_debug_row() {
        let ds = GeneralDataSource::new("ds1", None);
        assert_eq!(ds.source_type(), "general");
        assert_eq!(ds.quote_identifier().await, "`");

        let (mut writer, mut rx) = ResponseWriter::channel(&StreamOptions { max_block_size: 1 });
        let params = QueryParameters::default();
        ds.execute_query("select 1", &ColumnList::default(), &params, &mut writer)
            .await
            .unwrap();
        drop(writer);

        let block = rx.recv().await.unwrap().unwrap();
        // first column: non-null marker then the datasource id
        assert_eq!(block[0], 0);
        assert_eq!(block[1] as usize, "ds1".len());
        assert_eq!(&block[2..5], b"ds1");
    }

    #[tokio::test]
    async fn named_query_columns_are_remapped_by_name() {
        let named = NamedQuery::from_config(
            "t",
            &json!({
                "query": "select a, b, c from t",
                "columns": [
                    {"name": "a", "type": "UInt32", "nullable": false},
                    {"name": "b", "type": "String", "nullable": false},
                    {"name": "c", "type": "Float64", "nullable": false}
                ]
            }),
        )
        .unwrap();

        // the request asks for a subset, reordered
        let request: ColumnList =
            "columns format version: 1\n2 columns:\n`c` Float64\n`a` UInt32\n".parse().unwrap();

        struct Probe {
            core: SourceCore,
        }

        #[async_trait]
        impl DataSource for Probe {
            fn core(&self) -> &SourceCore {
                &self.core
            }

            async fn execute_query(
                &self,
                _query: &str,
                columns: &ColumnList,
                _params: &QueryParameters,
                _writer: &mut ResponseWriter,
            ) -> Result<()> {
                assert_eq!(columns.column(0).index(), Some(2));
                assert_eq!(columns.column(1).index(), Some(0));
                Ok(())
            }
        }

        let probe = Probe { core: SourceCore::new("p", None) };
        let (mut writer, _rx) = ResponseWriter::channel(&StreamOptions::default());
        probe
            .execute_named_query(&named, &request, &QueryParameters::default(), &mut writer)
            .await
            .unwrap();
    }
}
