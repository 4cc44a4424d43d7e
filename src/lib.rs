//! Bridge service that lets ClickHouse query foreign databases over HTTP.
//!
//! ClickHouse posts a connection string, schema and query; the bridge
//! resolves the target datasource, executes the query against a pooled
//! backend and streams the rows back in ClickHouse's native row binary
//! format. Datasources and named queries are configured as JSON files and
//! hot-reloaded while requests are in flight.

pub mod cache;
pub mod ch;
pub mod config;
pub mod datasource;
pub mod error;
pub mod handlers;
pub mod query;
pub mod resolver;
pub mod router;
pub mod state;
pub mod streaming;

pub use error::{BridgeError, Result};
