use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Closed set of column types the bridge can emit in native row binary format.
///
/// Names are case-sensitive and match ClickHouse's own spelling, which is what
/// shows up in the textual columns header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    // Signed
    Int8,
    Int16,
    Int32,
    Int64,

    // Unsigned
    UInt8,
    UInt16,
    UInt32,
    UInt64,

    // Floating point
    Float32,
    Float64,

    // Date time
    Date,
    DateTime,
    DateTime64,

    // Decimals
    Decimal,
    Decimal32,
    Decimal64,
    Decimal128,

    // Misc
    String,
}

pub const DEFAULT_DECIMAL_PRECISION: i32 = 10;
pub const DEFAULT_DECIMAL_SCALE: i32 = 4;
pub const DECIMAL32_PRECISION: i32 = 9;
pub const DEFAULT_DECIMAL32_SCALE: i32 = 2;
pub const DECIMAL64_PRECISION: i32 = 18;
pub const DEFAULT_DECIMAL64_SCALE: i32 = 4;
pub const DECIMAL128_PRECISION: i32 = 38;
pub const DEFAULT_DECIMAL128_SCALE: i32 = 8;

// https://clickhouse.com/docs/en/sql-reference/data-types/decimal
pub const MAX_PRECISION: i32 = 38;

pub const MAX_DATETIME64_SCALE: i32 = 18;
// Tick size (precision): 10^-scale seconds
pub const DEFAULT_DATETIME64_SCALE: i32 = 3;

impl DataType {
    pub fn is_decimal(self) -> bool {
        matches!(
            self,
            DataType::Decimal | DataType::Decimal32 | DataType::Decimal64 | DataType::Decimal128
        )
    }

    pub fn is_date_time(self) -> bool {
        matches!(self, DataType::DateTime | DataType::DateTime64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::UInt8 => "UInt8",
            DataType::UInt16 => "UInt16",
            DataType::UInt32 => "UInt32",
            DataType::UInt64 => "UInt64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Date => "Date",
            DataType::DateTime => "DateTime",
            DataType::DateTime64 => "DateTime64",
            DataType::Decimal => "Decimal",
            DataType::Decimal32 => "Decimal32",
            DataType::Decimal64 => "Decimal64",
            DataType::Decimal128 => "Decimal128",
            DataType::String => "String",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = match s {
            "Int8" => DataType::Int8,
            "Int16" => DataType::Int16,
            "Int32" => DataType::Int32,
            "Int64" => DataType::Int64,
            "UInt8" => DataType::UInt8,
            "UInt16" => DataType::UInt16,
            "UInt32" => DataType::UInt32,
            "UInt64" => DataType::UInt64,
            "Float32" => DataType::Float32,
            "Float64" => DataType::Float64,
            "Date" => DataType::Date,
            "DateTime" => DataType::DateTime,
            "DateTime64" => DataType::DateTime64,
            "Decimal" => DataType::Decimal,
            "Decimal32" => DataType::Decimal32,
            "Decimal64" => DataType::Decimal64,
            "Decimal128" => DataType::Decimal128,
            "String" => DataType::String,
            other => return Err(BridgeError::parse(format!("unknown data type [{other}]"))),
        };

        Ok(t)
    }
}
