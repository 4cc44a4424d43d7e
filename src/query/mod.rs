//! Request-side query handling: per-request parameter merging, ClickHouse
//! request normalization, and the named query registry.

pub mod named;
pub mod params;
pub mod parser;

pub use named::{NamedQuery, NamedQueryRegistry};
pub use params::{ParamOverrides, QueryParameters};
pub use parser::StreamOptions;
