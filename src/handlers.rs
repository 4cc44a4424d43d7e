use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::ch::column::COLUMN_DATASOURCE;
use crate::ch::{ColumnInfo, ColumnList, DataType};
use crate::datasource::{write_debug_info, DataSource, DEFAULT_QUOTE_IDENTIFIER};
use crate::error::{BridgeError, Result};
use crate::query::parser::{
    extract_table_name, normalize_query, strip_query_prefix, PARAM_COLUMNS, PARAM_CONNECTION_STRING,
    PARAM_SCHEMA, PARAM_TABLE,
};
use crate::query::{ParamOverrides, StreamOptions};
use crate::state::AppState;
use crate::streaming::{body_stream, ResponseWriter};

const RESPONSE_CONTENT_TYPE: &str = "application/octet-stream";

const PING_RESPONSE: &str = "Ok.\n";
const WRITE_RESPONSE: &str = "Ok.";

type Params = Query<HashMap<String, String>>;

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> &'a str {
    params.get(name).map(String::as_str).unwrap_or_default()
}

/// Liveness probe used by container orchestration.
pub async fn ping() -> &'static str {
    PING_RESPONSE
}

/// Returns the columns header for `(connection_string, schema, table)`. The
/// table may name a preconfigured query; otherwise the datasource infers the
/// columns from the backend.
pub async fn columns_info(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> Result<Response> {
    let query_timeout = state.settings.query_timeout;
    let work = handle_columns_info(&state, &params);

    let columns_info = timeout(Duration::from_millis(query_timeout), work)
        .await
        .map_err(|_| BridgeError::Timeout(query_timeout))??;

    debug!("Columns info:\n[{columns_info}]");
    Ok(octet_stream(columns_info))
}

async fn handle_columns_info(state: &AppState, params: &HashMap<String, String>) -> Result<String> {
    let raw_query = param(params, PARAM_TABLE);
    info!("Raw query:\n{raw_query}");

    let uri = param(params, PARAM_CONNECTION_STRING);
    let overrides = ParamOverrides::from_uri(uri);
    let ds = state.datasources.get(uri, overrides.debug())?;
    let merged = ds.new_query_parameters(&[&overrides]);

    if merged.debug {
        return Ok(ColumnList::default_columns_info().to_string());
    }

    // even if it's a named query, the column list could be empty
    let named = state.queries.get(raw_query);
    let mut columns = match named {
        Some(named) if named.has_column() => named.columns().clone(),
        _ => ds.get_columns(param(params, PARAM_SCHEMA), &normalize_query(raw_query)).await?,
    };

    let mut extra: Vec<ColumnInfo> = Vec::new();
    if merged.show_datasource_column {
        extra.push(ColumnInfo::new(COLUMN_DATASOURCE, DataType::String, true, 0, 0));
    }
    if merged.show_custom_columns {
        extra.extend_from_slice(ds.custom_columns());
    }
    if !extra.is_empty() {
        columns = columns.prepend(&extra);
    }

    Ok(columns.to_string())
}

/// Reports the identifier quote character of the backend behind the
/// connection string; defaults to a backtick when the source is unknown.
pub async fn identifier_quote(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> Result<Response> {
    let request_timeout = state.settings.request_timeout;
    let uri = param(&params, PARAM_CONNECTION_STRING).to_string();

    let work = async {
        match state.datasources.get(&uri, true) {
            Ok(ds) => Ok(ds.quote_identifier().await),
            Err(BridgeError::UnknownSource(_)) => Ok(DEFAULT_QUOTE_IDENTIFIER.to_string()),
            Err(e) => Err(e),
        }
    };

    let quote = timeout(Duration::from_millis(request_timeout), work)
        .await
        .map_err(|_| BridgeError::Timeout(request_timeout))??;

    Ok(octet_stream(quote))
}

/// Executes a query and streams the result back as chunked native row
/// binary. The body may carry a `query=` prefix; the connection string picks
/// the datasource and may override query parameters.
pub async fn query(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
    body: String,
) -> Result<Response> {
    let uri = param(&params, PARAM_CONNECTION_STRING);
    let overrides = ParamOverrides::from_uri(uri);
    let ds = state.datasources.get(uri, overrides.debug())?;

    let generated = strip_query_prefix(&body).to_string();
    let normalized = normalize_query(&generated);
    debug!("Generated query:\n{generated}\nNormalized query:\n{normalized}");

    // try if it's a named query first
    let named = state.queries.get(&normalized);
    let merged = match &named {
        Some(named) => ds.new_query_parameters(&[named.parameters(), &overrides]),
        None => ds.new_query_parameters(&[&overrides]),
    };

    let options = StreamOptions::from_params(&params);
    let (mut writer, rx) = ResponseWriter::channel(&options);
    let columns_header = param(&params, PARAM_COLUMNS).to_string();

    let permits = Arc::clone(&state.query_permits);
    let query_timeout = state.settings.query_timeout;

    tokio::spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };

        let produce = async {
            if merged.debug {
                write_debug_info(
                    &ds.id(),
                    ds.source_type(),
                    None,
                    &normalized,
                    Some(&merged),
                    &mut writer,
                )
                .await
            } else if let Some(named) = &named {
                debug!("Found named query: [{}]", named.id());
                let request_columns: ColumnList = columns_header.parse()?;
                ds.execute_named_query(named, &request_columns, &merged, &mut writer).await
            } else {
                let request_columns: ColumnList = columns_header.parse()?;
                let query = if normalized.contains(' ') { &normalized } else { &generated };
                ds.execute_query(query, &request_columns, &merged, &mut writer).await
            }
        };

        let outcome = timeout(Duration::from_millis(query_timeout), produce).await;
        match outcome {
            Ok(Ok(())) => {
                if let Err(e) = writer.finish().await {
                    debug!("Response ended early: {e}");
                }
            }
            Ok(Err(e)) => {
                error!("Failed to execute query: {e}");
                writer.fail(&e).await;
            }
            Err(_) => {
                let e = BridgeError::Timeout(query_timeout);
                error!("{e}");
                writer.fail(&e).await;
            }
        }
    });

    Ok((
        [(header::CONTENT_TYPE, RESPONSE_CONTENT_TYPE)],
        Body::from_stream(body_stream(rx)),
    )
        .into_response())
}

/// Reserved write endpoint: the mutation is parsed, handed to the
/// datasource, and acknowledged without being applied.
pub async fn write(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
    body: String,
) -> Result<Response> {
    let uri = param(&params, PARAM_CONNECTION_STRING);
    let overrides = ParamOverrides::from_uri(uri);
    let ds = state.datasources.get(uri, overrides.debug())?;
    let merged = ds.new_query_parameters(&[&overrides]);

    let schema = param(&params, PARAM_SCHEMA);
    let table = match params.get(PARAM_TABLE) {
        Some(table) => table.clone(),
        None => extract_table_name(strip_query_prefix(&body)),
    };
    let columns: ColumnList = param(&params, PARAM_COLUMNS).parse()?;

    ds.execute_write(schema, &table, &columns, &merged).await?;

    Ok(octet_stream(WRITE_RESPONSE.to_string()))
}

fn octet_stream(body: String) -> Response {
    ([(header::CONTENT_TYPE, RESPONSE_CONTENT_TYPE)], body).into_response()
}
