use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::ch::buffer::ByteBuf;
use crate::ch::data_type::{self, DataType};
use crate::ch::decimal::Decimal;
use crate::error::{BridgeError, Result};

pub const DEFAULT_NAME: &str = "unknown";
pub const DEFAULT_TYPE: DataType = DataType::String;
pub const DEFAULT_NULLABLE: bool = true;

const NULLABLE_BEGIN: &str = "Nullable(";
const NULLABLE_END: &str = ")";

/// A single typed column descriptor.
///
/// Precision and scale are normalized at construction: fixed-width decimals
/// pin their precision, scales fall back to per-type defaults and are clamped
/// to the effective precision. `index` is resolved once during named-query
/// column remapping and never reassigned.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub precision: i32,
    pub scale: i32,
    pub timezone: Option<Tz>,
    pub default_value: Option<String>,
    index: Option<usize>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool, precision: i32, scale: i32) -> Self {
        let (precision, recommended_scale) = match data_type {
            DataType::Decimal => (
                if precision <= 0 {
                    data_type::DEFAULT_DECIMAL_PRECISION
                } else {
                    precision.min(data_type::MAX_PRECISION)
                },
                data_type::DEFAULT_DECIMAL_SCALE,
            ),
            DataType::Decimal32 => (data_type::DECIMAL32_PRECISION, data_type::DEFAULT_DECIMAL32_SCALE),
            DataType::Decimal64 => (data_type::DECIMAL64_PRECISION, data_type::DEFAULT_DECIMAL64_SCALE),
            DataType::Decimal128 => (data_type::DECIMAL128_PRECISION, data_type::DEFAULT_DECIMAL128_SCALE),
            DataType::DateTime64 => (0, data_type::DEFAULT_DATETIME64_SCALE),
            _ => (precision.max(0), 0),
        };

        let scale = if scale <= 0 {
            recommended_scale
        } else if data_type == DataType::DateTime64 {
            scale.min(data_type::MAX_DATETIME64_SCALE)
        } else {
            scale.min(precision)
        };

        ColumnInfo {
            name: name.into(),
            data_type,
            nullable,
            precision,
            scale,
            timezone: None,
            default_value: None,
            index: None,
        }
    }

    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_default_value(mut self, value: Option<String>) -> Self {
        self.default_value = value;
        self
    }

    /// Position of this column in the backing result set, when remapped
    /// against a named query's column list. Set at most once.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        if self.index.is_none() {
            self.index = Some(index);
        } else {
            warn!("Column index of [{}] can only be set once", self.name);
        }
    }

    pub fn from_config(config: &ColumnConfig) -> Self {
        let data_type = match &config.data_type {
            Some(name) => name.parse().unwrap_or_else(|_| {
                warn!("Unknown type [{name}] for column [{}], falling back to String", config.name);
                DEFAULT_TYPE
            }),
            None => DEFAULT_TYPE,
        };

        let timezone = config.timezone.as_deref().and_then(|tz| {
            tz.parse::<Tz>()
                .map_err(|_| warn!("Ignoring unknown timezone [{tz}] of column [{}]", config.name))
                .ok()
        });

        let default_value = config.value.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        ColumnInfo::new(config.name.clone(), data_type, config.nullable, config.precision, config.scale)
            .with_timezone(timezone)
            .with_default_value(default_value)
    }

    /// Parses a single line of the columns header, e.g.
    /// `` `price` Nullable(Decimal(10,3)) ``.
    pub fn from_declaration(decl: &str) -> Result<Self> {
        let decl = decl.trim();
        if decl.is_empty() {
            return Ok(ColumnInfo::new(DEFAULT_NAME, DEFAULT_TYPE, DEFAULT_NULLABLE, 0, 0));
        }

        let (name, rest) = split_identifier(decl);
        let declared = rest.trim();
        if declared.is_empty() {
            return Ok(ColumnInfo::new(name, DEFAULT_TYPE, DEFAULT_NULLABLE, 0, 0));
        }

        let (declared, nullable) = match declared.strip_prefix(NULLABLE_BEGIN).and_then(|s| s.strip_suffix(NULLABLE_END)) {
            Some(inner) => (inner, true),
            None => (declared, false),
        };

        let (type_name, args) = match declared.find('(') {
            Some(open) if declared.ends_with(')') => {
                let inner = &declared[open + 1..declared.len() - 1];
                let args: Vec<&str> = inner.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
                (&declared[..open], args)
            }
            _ => (declared, Vec::new()),
        };

        let data_type: DataType = type_name.trim().parse()?;

        let mut precision = -1;
        let mut scale = -1;
        let mut timezone = None;

        match data_type {
            DataType::Decimal => match args.as_slice() {
                [] => {}
                [s] => scale = parse_int_arg(s)?,
                [p, s, extra @ ..] => {
                    precision = parse_int_arg(p)?;
                    scale = parse_int_arg(s)?;
                    if !extra.is_empty() {
                        warn!("Discarding extra arguments {extra:?} of [{decl}]");
                    }
                }
            },
            DataType::Decimal32 | DataType::Decimal64 | DataType::Decimal128 => {
                if let [s, extra @ ..] = args.as_slice() {
                    scale = parse_int_arg(s)?;
                    if !extra.is_empty() {
                        warn!("Discarding extra arguments {extra:?} of [{decl}]");
                    }
                }
            }
            DataType::DateTime => {
                if let [tz, extra @ ..] = args.as_slice() {
                    timezone = parse_tz_arg(tz);
                    if !extra.is_empty() {
                        warn!("Discarding extra arguments {extra:?} of [{decl}]");
                    }
                }
            }
            DataType::DateTime64 => {
                if let [s, rest @ ..] = args.as_slice() {
                    scale = parse_int_arg(s)?;
                    if let [tz, extra @ ..] = rest {
                        timezone = parse_tz_arg(tz);
                        if !extra.is_empty() {
                            warn!("Discarding extra arguments {extra:?} of [{decl}]");
                        }
                    }
                }
            }
            _ => {
                if !args.is_empty() {
                    warn!("Discarding arguments {args:?} of [{decl}]");
                }
            }
        }

        Ok(ColumnInfo::new(name, data_type, nullable, precision, scale).with_timezone(timezone))
    }

    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "name": self.name,
            "type": self.data_type.name(),
            "nullable": self.nullable,
            "precision": self.precision,
            "scale": self.scale,
        });
        if let Some(tz) = self.timezone {
            obj["timezone"] = Value::String(tz.name().to_string());
        }
        if let Some(value) = &self.default_value {
            obj["value"] = Value::String(value.clone());
        }
        obj
    }

    /// Emits this column's configured value, used for custom columns that are
    /// repeated on every streamed row.
    pub fn write_value_to(&self, buf: &mut ByteBuf) -> Result<()> {
        let value = match &self.default_value {
            Some(v) => v.as_str(),
            None => {
                if self.nullable {
                    buf.write_null();
                    return Ok(());
                }
                ""
            }
        };

        if self.nullable {
            buf.write_non_null();
        }

        let bad = |e: BridgeError| {
            BridgeError::encoding(format!("invalid value [{value}] for column [{}]: {e}", self.name))
        };

        match self.data_type {
            DataType::Int8 => buf.write_int8(parse_i64(value)?).map_err(bad)?,
            DataType::Int16 => buf.write_int16(parse_i64(value)?).map_err(bad)?,
            DataType::Int32 => buf.write_int32(parse_i64(value)? as i32),
            DataType::Int64 => buf.write_int64(parse_i64(value)?),
            DataType::UInt8 => buf.write_uint8(parse_i64(value)?).map_err(bad)?,
            DataType::UInt16 => buf.write_uint16(parse_i64(value)?).map_err(bad)?,
            DataType::UInt32 => buf.write_uint32(parse_i64(value)?).map_err(bad)?,
            DataType::UInt64 => buf.write_uint64(parse_i64(value)?).map_err(bad)?,
            DataType::Float32 => buf.write_float32(parse_f64(value)? as f32),
            DataType::Float64 => buf.write_float64(parse_f64(value)?),
            DataType::Date => buf.write_uint16(parse_i64(value)?).map_err(bad)?,
            DataType::DateTime => buf.write_uint32(parse_i64(value)?).map_err(bad)?,
            DataType::DateTime64 => buf.write_uint64(parse_i64(value)?).map_err(bad)?,
            DataType::Decimal => buf.write_decimal(&value.parse::<Decimal>()?, self.precision, self.scale)?,
            DataType::Decimal32 => buf.write_decimal32(&value.parse::<Decimal>()?, self.scale)?,
            DataType::Decimal64 => buf.write_decimal64(&value.parse::<Decimal>()?, self.scale)?,
            DataType::Decimal128 => buf.write_decimal128(&value.parse::<Decimal>()?, self.scale)?,
            DataType::String => buf.write_string(value),
        };

        Ok(())
    }
}

fn parse_i64(value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::encoding(format!("invalid integer value [{value}]")))
}

fn parse_f64(value: &str) -> Result<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::encoding(format!("invalid float value [{value}]")))
}

fn parse_int_arg(arg: &str) -> Result<i32> {
    arg.parse()
        .map_err(|_| BridgeError::parse(format!("invalid type argument [{arg}]")))
}

fn parse_tz_arg(arg: &str) -> Option<Tz> {
    let name = arg.trim_matches('\'');
    match name.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            warn!("Discarding unknown timezone argument [{arg}]");
            None
        }
    }
}

/// Splits a column declaration into (identifier, remainder). The identifier
/// may be backtick- or double-quoted with doubled quotes as escapes, or bare
/// up to the first whitespace.
fn split_identifier(decl: &str) -> (String, &str) {
    let bytes = decl.as_bytes();
    let quote = bytes[0];

    if quote == b'`' || quote == b'"' {
        let mut name = String::new();
        let mut i = 1;
        while i < bytes.len() {
            if bytes[i] == quote {
                if i + 1 < bytes.len() && bytes[i + 1] == quote {
                    name.push(quote as char);
                    i += 2;
                } else {
                    return (name, &decl[i + 1..]);
                }
            } else {
                let ch = decl[i..].chars().next().expect("char boundary");
                name.push(ch);
                i += ch.len_utf8();
            }
        }
        (name, "")
    } else {
        match decl.find(char::is_whitespace) {
            Some(pos) => (decl[..pos].to_string(), &decl[pos..]),
            None => (decl.to_string(), ""),
        }
    }
}

impl PartialEq for ColumnInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.precision == other.precision
            && self.scale == other.scale
            && self.timezone == other.timezone
    }
}

impl Eq for ColumnInfo {}

impl fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` ", self.name.replace('`', "``"))?;

        if self.nullable {
            f.write_str(NULLABLE_BEGIN)?;
        }

        f.write_str(self.data_type.name())?;
        match self.data_type {
            DataType::Decimal => write!(f, "({},{})", self.precision, self.scale)?,
            DataType::Decimal32 | DataType::Decimal64 | DataType::Decimal128 => {
                write!(f, "({})", self.scale)?
            }
            DataType::DateTime => {
                if let Some(tz) = self.timezone {
                    write!(f, "('{}')", tz.name())?
                }
            }
            DataType::DateTime64 => match self.timezone {
                Some(tz) => write!(f, "({},'{}')", self.scale, tz.name())?,
                None => write!(f, "({})", self.scale)?,
            },
            _ => {}
        }

        if self.nullable {
            f.write_str(NULLABLE_END)?;
        }

        Ok(())
    }
}

/// serde model for a column in datasource / named query configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: Option<String>,
    pub nullable: bool,
    pub precision: i32,
    pub scale: i32,
    pub timezone: Option<String>,
    pub value: Option<Value>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        ColumnConfig {
            name: DEFAULT_NAME.to_string(),
            data_type: None,
            nullable: DEFAULT_NULLABLE,
            precision: 0,
            scale: 0,
            timezone: None,
            value: None,
        }
    }
}

pub const DEFAULT_VERSION: i32 = 1;

pub const COLUMN_DATASOURCE: &str = "datasource";

const COLUMN_HEADER: &str = "columns format version: ";
const COLUMN_COUNT: &str = " columns:";

/// Ordered column list, round-trippable to the textual columns header
/// ClickHouse exchanges with the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnList {
    version: i32,
    columns: Vec<ColumnInfo>,
}

impl Default for ColumnList {
    fn default() -> Self {
        ColumnList { version: DEFAULT_VERSION, columns: Vec::new() }
    }
}

impl ColumnList {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self::with_version(DEFAULT_VERSION, columns)
    }

    pub fn with_version(version: i32, mut columns: Vec<ColumnInfo>) -> Self {
        for (i, column) in columns.iter_mut().enumerate() {
            if column.name == DEFAULT_NAME {
                column.name = (i + 1).to_string();
            }
        }
        ColumnList { version, columns }
    }

    /// The synthetic column set used for debug responses: datasource id,
    /// type, column definition, query and effective parameters.
    pub fn default_columns_info() -> Self {
        static DEFAULT_COLUMNS_INFO: Lazy<ColumnList> = Lazy::new(|| {
            ColumnList::new(
                ["datasource", "type", "definition", "query", "parameters"]
                    .into_iter()
                    .map(|name| ColumnInfo::new(name, DataType::String, true, 0, 0))
                    .collect(),
            )
        });

        DEFAULT_COLUMNS_INFO.clone()
    }

    pub fn from_configs(configs: &[ColumnConfig]) -> Self {
        ColumnList::new(configs.iter().map(ColumnInfo::from_config).collect())
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    pub fn column_mut(&mut self, index: usize) -> &mut ColumnInfo {
        &mut self.columns[index]
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn prepend(&self, extra: &[ColumnInfo]) -> ColumnList {
        let mut columns = extra.to_vec();
        columns.extend_from_slice(&self.columns);
        ColumnList { version: self.version, columns }
    }

    pub fn append(&self, extra: &[ColumnInfo]) -> ColumnList {
        let mut columns = self.columns.clone();
        columns.extend_from_slice(extra);
        ColumnList { version: self.version, columns }
    }

    /// Copies configured values from same-position reference columns, so a
    /// request column list picks up datasource / custom column values.
    pub fn update_values(&mut self, reference: &[ColumnInfo]) {
        for (column, re) in self.columns.iter_mut().zip(reference) {
            if re.default_value.is_some() {
                column.default_value = re.default_value.clone();
            }
        }
    }

    pub fn to_json_string(&self, query: Option<&str>) -> String {
        let mut obj = json!({ "version": self.version });
        if let Some(query) = query {
            obj["query"] = Value::String(query.to_string());
        }
        if !self.columns.is_empty() {
            obj["columns"] = Value::Array(self.columns.iter().map(ColumnInfo::to_json).collect());
        }
        obj.to_string()
    }
}

impl FromStr for ColumnList {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        if !s.starts_with(COLUMN_HEADER) {
            return Ok(ColumnList::default());
        }

        let lines: Vec<&str> = s.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let mut version = DEFAULT_VERSION;
        let mut columns = Vec::with_capacity(lines.len().saturating_sub(2));

        for (index, line) in lines.iter().enumerate() {
            let fail = |msg: String| BridgeError::parse(format!("failed to parse line #{}:\n{line}\n{msg}", index + 1));

            if index == 0 {
                version = line[COLUMN_HEADER.len()..]
                    .trim()
                    .parse()
                    .map_err(|e| fail(format!("invalid version: {e}")))?;
            } else if index == 1 {
                let declared = line
                    .strip_suffix(COLUMN_COUNT.trim_start())
                    .map(str::trim)
                    .ok_or_else(|| fail(format!("line must end with '{COLUMN_COUNT}'")))?;
                let declared: usize =
                    declared.parse().map_err(|e| fail(format!("invalid column count: {e}")))?;
                if lines.len() - 2 < declared {
                    return Err(fail(format!(
                        "inconsistent columns count: declared {declared} but looks like {}",
                        lines.len() - 2
                    )));
                }
            } else {
                columns.push(ColumnInfo::from_declaration(line).map_err(|e| fail(e.to_string()))?);
            }
        }

        Ok(ColumnList::with_version(version, columns))
    }
}

impl fmt::Display for ColumnList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COLUMN_HEADER}{}\n{}{COLUMN_COUNT}\n", self.version, self.columns.len())?;
        for column in &self.columns {
            writeln!(f, "{column}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_names_unescape() {
        let c = ColumnInfo::from_declaration("`column``1` Nullable(String)").unwrap();
        assert_eq!(c.name, "column`1");
        assert_eq!(c.data_type, DataType::String);
        assert!(c.nullable);

        let c = ColumnInfo::from_declaration("column`1 Nullable(String)").unwrap();
        assert_eq!(c.name, "column`1");

        let c = ColumnInfo::from_declaration("`````cl``o````u``mn`````").unwrap();
        assert_eq!(c.name, "``cl`o``u`mn``");
    }

    #[test]
    fn bare_names_default_to_nullable_string() {
        let c = ColumnInfo::from_declaration("column1").unwrap();
        assert_eq!(c.data_type, DataType::String);
        assert!(c.nullable);

        let c = ColumnInfo::from_declaration("column1 String").unwrap();
        assert_eq!(c.data_type, DataType::String);
        assert!(!c.nullable);
    }

    #[test]
    fn decimal_normalization() {
        let c = ColumnInfo::new("d", DataType::Decimal, true, 10, 3);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal(10,3))");

        let c = ColumnInfo::new("d", DataType::Decimal32, true, 10, 3);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal32(3))");

        let c = ColumnInfo::new("d", DataType::Decimal64, true, 10, 3);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal64(3))");

        let c = ColumnInfo::new("d", DataType::Decimal128, true, 10, 3);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal128(3))");

        // out-of-range scales clamp to the effective precision
        let c = ColumnInfo::new("d", DataType::Decimal, true, 10, 50);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal(10,10))");
        let c = ColumnInfo::new("d", DataType::Decimal32, true, 10, 50);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal32(9))");
        let c = ColumnInfo::new("d", DataType::Decimal64, true, 10, 50);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal64(18))");
        let c = ColumnInfo::new("d", DataType::Decimal128, true, 10, 50);
        assert_eq!(c.to_string(), "`d` Nullable(Decimal128(38))");
    }

    #[test]
    fn declaration_round_trips() {
        for decl in [
            "`d` Nullable(Decimal(7,3))",
            "`d` Nullable(Decimal64(8))",
            "`ts` DateTime('Asia/Shanghai')",
            "`ts` Nullable(DateTime64(6))",
        ] {
            assert_eq!(ColumnInfo::from_declaration(decl).unwrap().to_string(), decl);
        }
    }

    #[test]
    fn index_is_set_once() {
        let mut c = ColumnInfo::new("a", DataType::UInt32, false, 0, 0);
        assert_eq!(c.index(), None);
        c.set_index(3);
        c.set_index(5);
        assert_eq!(c.index(), Some(3));
    }

    #[test]
    fn list_header_round_trips() {
        let header = "columns format version: 1\n2 columns:\n`a` UInt32\n`d` Nullable(Decimal(10,3))\n";
        let list: ColumnList = header.parse().unwrap();
        assert_eq!(list.size(), 2);
        assert_eq!(list.to_string(), header);
        assert_eq!(header.parse::<ColumnList>().unwrap(), list);
    }

    #[test]
    fn list_rejects_understated_counts() {
        assert!("columns format version: 1\n3 columns:\n`a` UInt32\n".parse::<ColumnList>().is_err());
    }

    #[test]
    fn non_header_input_yields_empty_list() {
        let list: ColumnList = "whatever".parse().unwrap();
        assert_eq!(list.size(), 0);
        assert_eq!(list.version(), DEFAULT_VERSION);
    }

    #[test]
    fn unnamed_columns_take_ordinal_names() {
        let list = ColumnList::new(vec![
            ColumnInfo::new(DEFAULT_NAME, DataType::UInt8, false, 0, 0),
            ColumnInfo::new("b", DataType::String, true, 0, 0),
            ColumnInfo::new(DEFAULT_NAME, DataType::Date, false, 0, 0),
        ]);
        assert_eq!(list.column(0).name, "1");
        assert_eq!(list.column(1).name, "b");
        assert_eq!(list.column(2).name, "3");
    }
}
