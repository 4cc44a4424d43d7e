//! ClickHouse-facing data model: the closed type system, typed column
//! descriptors with their textual header grammar, and the native row binary
//! encoder.

pub mod buffer;
pub mod column;
pub mod data_type;
pub mod decimal;
pub mod defaults;

pub use buffer::ByteBuf;
pub use column::{ColumnConfig, ColumnInfo, ColumnList};
pub use data_type::DataType;
pub use decimal::Decimal;
pub use defaults::{DefaultValue, DefaultValues};
