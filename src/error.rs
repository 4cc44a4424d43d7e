use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data source [{0}] not found!")]
    UnknownSource(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Response stream was closed")]
    WriterClosed,

    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        BridgeError::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        BridgeError::Parse(msg.into())
    }

    pub fn backend<S: Into<String>>(msg: S) -> Self {
        BridgeError::Backend(msg.into())
    }

    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        BridgeError::Encoding(msg.into())
    }
}

// ClickHouse treats any non-200 from the bridge as a query failure and shows
// the body to the user, so every error maps to a plain-text 500.
impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
