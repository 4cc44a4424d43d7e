use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use tracing::{info, warn};

use crate::ch::{ByteBuf, ColumnInfo, ColumnList, DataType, Decimal, DefaultValues};
use crate::datasource::registry::SourceFactory;
use crate::datasource::{DataSource, DataSourceConfig, SourceCore, DEFAULT_QUOTE_IDENTIFIER};
use crate::error::{BridgeError, Result};
use crate::query::QueryParameters;
use crate::resolver::NameResolver;
use crate::streaming::ResponseWriter;

pub const DATASOURCE_TYPE: &str = "jdbc";

const QUERY_TABLE_BEGIN: &str = "SELECT * FROM ";
const QUERY_TABLE_END: &str = " WHERE 1 = 0";

const SQL_FILE_EXT: &str = ".sql";

const PROP_PASSWORD: &str = "password";

const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Registers the compiled-in database drivers with sqlx's Any driver. Safe to
/// call more than once.
pub fn install_drivers() {
    static ONCE: Once = Once::new();
    ONCE.call_once(sqlx::any::install_default_drivers);
}

pub fn factory() -> SourceFactory {
    Arc::new(|id: &str, resolver: &Arc<dyn NameResolver>, config: Option<&Value>| {
        Ok(Arc::new(SqlDataSource::new(id, resolver, config)?) as Arc<dyn DataSource>)
    })
}

/// Relational backend reached through a lazily-connected sqlx pool. The
/// connection URL picks the driver, mirroring how a JDBC URL picks its
/// driver class.
pub struct SqlDataSource {
    core: SourceCore,
    pool: sqlx::AnyPool,
    quote: &'static str,
    closed: AtomicBool,
}

impl SqlDataSource {
    pub fn new(id: &str, resolver: &Arc<dyn NameResolver>, raw: Option<&Value>) -> Result<Self> {
        install_drivers();

        let core = SourceCore::new(id, raw);
        let config = raw.map(|raw| DataSourceConfig::from_value(id, raw)).unwrap_or_default();

        let url = match &config.url {
            Some(url) => resolver.resolve(url),
            // adhoc: the connection string itself, shorn of the type prefix
            None => {
                let url = id.strip_prefix("jdbc:").unwrap_or(id);
                let url = url.split_once('?').map_or(url, |(head, _)| head);
                url.to_string()
            }
        };

        let mut options = AnyPoolOptions::new()
            .min_connections(DEFAULT_MIN_CONNECTIONS)
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .test_before_acquire(true);

        for (key, value) in &config.driver_properties {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let text = if key == PROP_PASSWORD { text } else { resolver.resolve(&text) };

            match key.as_str() {
                "minimumIdle" => {
                    if let Ok(v) = text.parse() {
                        options = options.min_connections(v);
                    }
                }
                "maximumPoolSize" => {
                    if let Ok(v) = text.parse() {
                        options = options.max_connections(v);
                    }
                }
                "connectionTimeout" => {
                    if let Ok(v) = text.parse() {
                        options = options.acquire_timeout(std::time::Duration::from_millis(v));
                    }
                }
                "idleTimeout" => {
                    if let Ok(v) = text.parse() {
                        options = options.idle_timeout(Some(std::time::Duration::from_millis(v)));
                    }
                }
                "maxLifetime" => {
                    if let Ok(v) = text.parse() {
                        options = options.max_lifetime(Some(std::time::Duration::from_millis(v)));
                    }
                }
                PROP_PASSWORD => {}
                other => warn!("Ignoring unsupported pool property [{other}] of datasource [{id}]"),
            }
        }

        let pool = options
            .connect_lazy(&url)
            .map_err(|e| BridgeError::config(format!("invalid connection URL of [{id}]: {e}")))?;

        Ok(SqlDataSource { core, pool, quote: quote_for_url(&url), closed: AtomicBool::new(false) })
    }

    fn table_probe(&self, schema: &str, table: &str) -> String {
        let quote = self.quote;
        let mut sql = String::with_capacity(table.len() + schema.len() + 32);
        sql.push_str(QUERY_TABLE_BEGIN);
        if !schema.is_empty() {
            sql.push_str(quote);
            sql.push_str(schema);
            sql.push_str(quote);
            sql.push('.');
        }
        sql.push_str(quote);
        sql.push_str(table);
        sql.push_str(quote);
        sql.push_str(QUERY_TABLE_END);
        sql
    }

    async fn stream_rows(
        &self,
        query: &str,
        columns: &ColumnList,
        params: &QueryParameters,
        writer: &mut ResponseWriter,
    ) -> Result<()> {
        let custom = self.custom_columns();
        let mut prefix_len = 0;
        if params.show_datasource_column {
            prefix_len += 1;
        }
        if params.show_custom_columns {
            prefix_len += custom.len();
        }

        let estimated = (columns.size().max(1)) * 4;
        // absolute position takes priority over offset
        let skip = if params.position != 0 { params.position } else { params.offset }.max(0) as i64;

        let mut rows = sqlx::query(query).fetch(&self.pool);
        let mut fetched: i64 = 0;
        let mut skipped: i64 = 0;

        while let Some(row) = rows.try_next().await? {
            fetched += 1;
            if params.max_rows > 0 && fetched > params.max_rows as i64 {
                break;
            }
            if skipped < skip {
                skipped += 1;
                continue;
            }

            if !writer.is_open() {
                return Err(BridgeError::WriterClosed);
            }

            let mut buf = ByteBuf::with_timezone(estimated, self.timezone());
            if params.show_datasource_column {
                buf.write_non_null().write_string(&self.core.id);
            }
            if params.show_custom_columns {
                for column in custom {
                    column.write_value_to(&mut buf)?;
                }
            }

            for i in prefix_len..columns.size() {
                let column = columns.column(i);
                let index = column.index().unwrap_or(i - prefix_len);
                write_row_value(&mut buf, &row, index, column, params, self.default_values())?;
            }

            writer.write(buf).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl DataSource for SqlDataSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn source_type(&self) -> &'static str {
        DATASOURCE_TYPE
    }

    fn is_saved_query(&self, file: &str) -> bool {
        file.ends_with(super::QUERY_FILE_EXT) || file.ends_with(SQL_FILE_EXT)
    }

    async fn quote_identifier(&self) -> String {
        self.quote.to_string()
    }

    async fn infer_columns(&self, schema: &str, query: &str) -> Result<ColumnList> {
        info!("Inferring database columns: schema=[{schema}], query=[{query}]");

        let sql = if !query.contains(char::is_whitespace) {
            self.table_probe(schema, query)
        } else {
            query.to_string()
        };

        // could be very slow...
        let describe = self.pool.describe(&sql).await?;

        let mut columns = Vec::with_capacity(describe.columns().len());
        for (i, column) in describe.columns().iter().enumerate() {
            let nullable = describe.nullable(i).unwrap_or(true);
            let data_type = map_backend_type(column.type_info().name());
            columns.push(ColumnInfo::new(column.name(), data_type, nullable, 0, 0));
        }

        Ok(ColumnList::new(columns))
    }

    async fn execute_query(
        &self,
        query: &str,
        columns: &ColumnList,
        params: &QueryParameters,
        writer: &mut ResponseWriter,
    ) -> Result<()> {
        info!("Executing SQL:\n{query}");

        self.stream_rows(query, columns, params, writer).await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closing connection pool of [{}]", self.core.id);
            self.pool.close().await;
        }
    }
}

fn quote_for_url(url: &str) -> &'static str {
    let scheme = url.split(':').next().unwrap_or_default();
    match scheme {
        "postgres" | "postgresql" | "sqlite" => "\"",
        "mysql" | "mariadb" => "`",
        _ => DEFAULT_QUOTE_IDENTIFIER,
    }
}

/// Backend type name → ClickHouse type, the sqlx counterpart of the JDBC
/// type mapping. Unsigned integer flavors keep their width on the unsigned
/// side; anything unrecognized degrades to String with a warning.
fn map_backend_type(name: &str) -> DataType {
    let upper = name.to_ascii_uppercase();
    let unsigned = upper.contains("UNSIGNED");

    match upper.split_whitespace().next().unwrap_or_default() {
        "BIT" | "BOOL" | "BOOLEAN" => DataType::UInt8,
        "TINYINT" => {
            if unsigned {
                DataType::UInt8
            } else {
                DataType::Int8
            }
        }
        "SMALLINT" | "INT2" => {
            if unsigned {
                DataType::UInt16
            } else {
                DataType::Int16
            }
        }
        "INT" | "INTEGER" | "INT4" | "MEDIUMINT" => {
            if unsigned {
                DataType::UInt32
            } else {
                DataType::Int32
            }
        }
        "BIGINT" | "INT8" => {
            if unsigned {
                DataType::UInt64
            } else {
                DataType::Int64
            }
        }
        "REAL" | "FLOAT" | "FLOAT4" => DataType::Float32,
        "DOUBLE" | "FLOAT8" => DataType::Float64,
        "NUMERIC" | "DECIMAL" => DataType::Decimal,
        "CHAR" | "NCHAR" | "VARCHAR" | "NVARCHAR" | "TEXT" | "LONGTEXT" | "MEDIUMTEXT"
        | "TINYTEXT" | "NULL" => DataType::String,
        "DATE" => DataType::Date,
        "TIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => DataType::DateTime64,
        other => {
            warn!("Unsupported backend type [{other}], which will be treated as [String]");
            DataType::String
        }
    }
}

fn write_row_value(
    buf: &mut ByteBuf,
    row: &AnyRow,
    index: usize,
    column: &ColumnInfo,
    params: &QueryParameters,
    defaults: &DefaultValues,
) -> Result<()> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| BridgeError::backend(format!("no column #{index} in result: {e}")))?;

    if raw.is_null() {
        return match (column.nullable, params.null_as_default) {
            (true, true) => {
                buf.write_non_null().write_default_value(column, defaults)?;
                Ok(())
            }
            (true, false) => {
                buf.write_null();
                Ok(())
            }
            (false, true) => {
                buf.write_default_value(column, defaults)?;
                Ok(())
            }
            (false, false) => Err(BridgeError::encoding(format!(
                "backend returned null for non-nullable column [{}]",
                column.name
            ))),
        };
    }

    if column.nullable {
        buf.write_non_null();
    }

    match column.data_type {
        DataType::Int8 => {
            buf.write_int8(get_i64(row, index)?)?;
        }
        DataType::Int16 => {
            buf.write_int16(get_i64(row, index)?)?;
        }
        DataType::Int32 => {
            buf.write_int32(get_i64(row, index)? as i32);
        }
        DataType::Int64 => {
            buf.write_int64(get_i64(row, index)?);
        }
        DataType::UInt8 => {
            buf.write_uint8(get_i64(row, index)?)?;
        }
        DataType::UInt16 => {
            buf.write_uint16(get_i64(row, index)?)?;
        }
        DataType::UInt32 => {
            buf.write_uint32(get_i64(row, index)?)?;
        }
        DataType::UInt64 => {
            buf.write_uint64(get_i64(row, index)?)?;
        }
        DataType::Float32 => {
            buf.write_float32(get_f64(row, index)? as f32);
        }
        DataType::Float64 => {
            buf.write_float64(get_f64(row, index)?);
        }
        DataType::Date => {
            buf.write_date(get_date(row, index)?)?;
        }
        DataType::DateTime => {
            buf.write_datetime(get_datetime(row, index)?, column.timezone);
        }
        DataType::DateTime64 => {
            buf.write_datetime64(get_datetime(row, index)?, column.timezone);
        }
        DataType::Decimal => {
            buf.write_decimal(&get_decimal(row, index)?, column.precision, column.scale)?;
        }
        DataType::Decimal32 => {
            buf.write_decimal32(&get_decimal(row, index)?, column.scale)?;
        }
        DataType::Decimal64 => {
            buf.write_decimal64(&get_decimal(row, index)?, column.scale)?;
        }
        DataType::Decimal128 => {
            buf.write_decimal128(&get_decimal(row, index)?, column.scale)?;
        }
        DataType::String => {
            buf.write_string(&get_string(row, index)?);
        }
    }

    Ok(())
}

fn get_i64(row: &AnyRow, index: usize) -> Result<i64> {
    row.try_get::<i64, _>(index)
        .or_else(|_| row.try_get::<i32, _>(index).map(i64::from))
        .or_else(|_| row.try_get::<i16, _>(index).map(i64::from))
        .or_else(|_| row.try_get::<bool, _>(index).map(i64::from))
        .map_err(|e| BridgeError::backend(format!("not an integer at column #{index}: {e}")))
}

fn get_f64(row: &AnyRow, index: usize) -> Result<f64> {
    row.try_get::<f64, _>(index)
        .or_else(|_| row.try_get::<f32, _>(index).map(f64::from))
        .or_else(|_| row.try_get::<i64, _>(index).map(|v| v as f64))
        .map_err(|e| BridgeError::backend(format!("not a float at column #{index}: {e}")))
}

fn get_string(row: &AnyRow, index: usize) -> Result<String> {
    row.try_get::<String, _>(index)
        .or_else(|_| row.try_get::<i64, _>(index).map(|v| v.to_string()))
        .or_else(|_| row.try_get::<f64, _>(index).map(|v| v.to_string()))
        .map_err(|e| BridgeError::backend(format!("not a string at column #{index}: {e}")))
}

fn get_decimal(row: &AnyRow, index: usize) -> Result<Decimal> {
    get_string(row, index)?.parse()
}

fn get_date(row: &AnyRow, index: usize) -> Result<NaiveDate> {
    let text = get_string(row, index)?;
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| BridgeError::backend(format!("invalid date [{text}]: {e}")))
}

fn get_datetime(row: &AnyRow, index: usize) -> Result<NaiveDateTime> {
    let text = get_string(row, index)?;
    let trimmed = text.trim();

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).expect("midnight")))
        .map_err(|e| BridgeError::backend(format!("invalid timestamp [{text}]: {e}")))
}
