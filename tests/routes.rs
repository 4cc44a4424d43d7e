use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use datasource_bridge::config::ServerConfig;
use datasource_bridge::resolver::SystemResolver;
use datasource_bridge::router;
use datasource_bridge::state::AppState;

fn config(value: Value) -> HashMap<String, Value> {
    value.as_object().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn app() -> axum::Router {
    let state = Arc::new(AppState::new(ServerConfig::default(), Arc::new(SystemResolver)));

    state.datasources.reload(&config(json!({"ch": {}})));
    state.queries.reload(&config(json!({
        "t": {"query": "select 1", "columns": [{"name": "a", "type": "UInt32", "nullable": false}]}
    })));

    router::build(state)
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

fn read_nullable_string(bytes: &[u8]) -> (Option<String>, &[u8]) {
    let (null, rest) = bytes.split_first().unwrap();
    if *null == 1 {
        return (None, rest);
    }

    let mut len = 0usize;
    let mut shift = 0;
    let mut rest = rest;
    loop {
        let (b, r) = rest.split_first().unwrap();
        rest = r;
        len |= ((b & 0x7f) as usize) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let (value, rest) = rest.split_at(len);
    (Some(String::from_utf8(value.to_vec()).unwrap()), rest)
}

#[tokio::test]
async fn ping_answers_ok() {
    let response = app()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"Ok.\n");
}

#[tokio::test]
async fn columns_info_serves_named_query_columns() {
    let request = Request::builder()
        .method("POST")
        .uri("/columns_info?connection_string=ch&table=t")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_bytes(response).await,
        b"columns format version: 1\n1 columns:\n`a` UInt32\n"
    );
}

#[tokio::test]
async fn columns_info_in_debug_mode_serves_the_debug_columns() {
    let request = Request::builder()
        .method("POST")
        .uri("/columns_info?connection_string=ch%3Fdebug%3Dtrue&table=t")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.starts_with("columns format version: 1\n5 columns:\n`datasource` Nullable(String)\n"));
}

#[tokio::test]
async fn unknown_source_maps_to_500_with_message() {
    let request = Request::builder()
        .method("POST")
        .uri("/columns_info?connection_string=nope&table=t2")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_bytes(response).await, b"Data source [nope] not found!");
}

#[tokio::test]
async fn debug_query_echoes_the_datasource() {
    let request = Request::builder()
        .method("POST")
        .uri("/?connection_string=ch%3Fdebug%3Dtrue")
        .body(Body::from("query=select 1"))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );

    let body = body_bytes(response).await;
    let (datasource, rest) = read_nullable_string(&body);
    let (source_type, rest) = read_nullable_string(rest);
    let (definition, rest) = read_nullable_string(rest);
    let (query, rest) = read_nullable_string(rest);
    let (parameters, rest) = read_nullable_string(rest);

    assert_eq!(datasource.as_deref(), Some("ch"));
    assert_eq!(source_type.as_deref(), Some("general"));
    assert!(definition.unwrap().contains("\"query\":\"select 1\""));
    assert_eq!(query.as_deref(), Some("select 1"));
    assert_eq!(
        parameters.as_deref(),
        Some("fetch_size=1000&max_rows=0&offset=0&position=0&null_as_default=false")
    );
    assert!(rest.is_empty());
}

#[tokio::test]
async fn identifier_quote_defaults_to_backtick() {
    let request = Request::builder()
        .method("POST")
        .uri("/identifier_quote?connection_string=anything")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"`");
}

#[tokio::test]
async fn write_is_acknowledged_but_discarded() {
    let request = Request::builder()
        .method("POST")
        .uri("/write?connection_string=ch&schema=s&table=x")
        .body(Body::from("query=INSERT INTO `x` VALUES (1)"))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"Ok.");
}
