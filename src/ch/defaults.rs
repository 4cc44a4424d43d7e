use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::ch::data_type::DataType;
use crate::ch::decimal::Decimal;

/// Per-type values substituted for backend nulls when `null_as_default` is in
/// effect. Sources may override individual entries through their `defaults`
/// configuration block, keyed by type name.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Int(i64),
    Float(f64),
    Dec(Decimal),
    Text(String),
}

impl DefaultValue {
    pub fn as_int(&self) -> i64 {
        match self {
            DefaultValue::Int(v) => *v,
            DefaultValue::Float(v) => *v as i64,
            _ => 0,
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            DefaultValue::Float(v) => *v,
            DefaultValue::Int(v) => *v as f64,
            _ => 0.0,
        }
    }

    pub fn as_decimal(&self) -> Decimal {
        match self {
            DefaultValue::Dec(v) => *v,
            DefaultValue::Int(v) => Decimal::new(*v as i128, 0),
            _ => Decimal::ZERO,
        }
    }

    pub fn as_text(&self) -> &str {
        match self {
            DefaultValue::Text(v) => v,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefaultValues {
    values: BTreeMap<DataType, DefaultValue>,
}

impl Default for DefaultValues {
    fn default() -> Self {
        let mut values = BTreeMap::new();

        for t in [
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::Int64,
            DataType::UInt8,
            DataType::UInt16,
            DataType::UInt32,
            DataType::UInt64,
        ] {
            values.insert(t, DefaultValue::Int(0));
        }

        values.insert(DataType::Float32, DefaultValue::Float(0.0));
        values.insert(DataType::Float64, DefaultValue::Float(0.0));

        // day 1 / second 1 instead of 0 so the value survives ClickHouse's
        // zero-date normalization
        values.insert(DataType::Date, DefaultValue::Int(1));
        values.insert(DataType::DateTime, DefaultValue::Int(1));
        values.insert(DataType::DateTime64, DefaultValue::Int(1000));

        for t in [DataType::Decimal, DataType::Decimal32, DataType::Decimal64, DataType::Decimal128] {
            values.insert(t, DefaultValue::Dec(Decimal::ZERO));
        }

        values.insert(DataType::String, DefaultValue::Text(String::new()));

        DefaultValues { values }
    }
}

impl DefaultValues {
    pub fn from_config(config: Option<&Value>) -> Self {
        let mut defaults = DefaultValues::default();
        if let Some(config) = config {
            defaults.merge(config);
        }
        defaults
    }

    pub fn merge(&mut self, config: &Value) -> &mut Self {
        let Some(map) = config.as_object() else {
            return self;
        };

        for (name, value) in map {
            let Ok(data_type) = name.parse::<DataType>() else {
                warn!("Ignoring default value for unknown type [{name}]");
                continue;
            };

            if let Some(parsed) = Self::coerce(data_type, value) {
                self.values.insert(data_type, parsed);
            } else {
                warn!("Ignoring incompatible default value for [{name}]: {value}");
            }
        }

        self
    }

    pub fn get(&self, data_type: DataType) -> &DefaultValue {
        &self.values[&data_type]
    }

    fn coerce(data_type: DataType, value: &Value) -> Option<DefaultValue> {
        match data_type {
            DataType::Float32 | DataType::Float64 => value.as_f64().map(DefaultValue::Float),
            DataType::Decimal | DataType::Decimal32 | DataType::Decimal64 | DataType::Decimal128 => {
                match value {
                    Value::Number(n) => n.to_string().parse().ok().map(DefaultValue::Dec),
                    Value::String(s) => s.parse().ok().map(DefaultValue::Dec),
                    _ => None,
                }
            }
            DataType::String => value.as_str().map(|s| DefaultValue::Text(s.to_string())),
            _ => value.as_i64().map(DefaultValue::Int),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn built_in_defaults() {
        let d = DefaultValues::default();
        assert_eq!(d.get(DataType::Int32).as_int(), 0);
        assert_eq!(d.get(DataType::Date).as_int(), 1);
        assert_eq!(d.get(DataType::DateTime64).as_int(), 1000);
        assert_eq!(d.get(DataType::Decimal).as_decimal(), Decimal::ZERO);
        assert_eq!(d.get(DataType::String).as_text(), "");
    }

    #[test]
    fn merge_overrides_known_types_only() {
        let mut d = DefaultValues::default();
        d.merge(&json!({"Int32": 3, "Float64": 3.0, "Decimal": "3", "String": "3", "NoSuchType": 9}));
        assert_eq!(d.get(DataType::Int32).as_int(), 3);
        assert_eq!(d.get(DataType::Float64).as_float(), 3.0);
        assert_eq!(d.get(DataType::Decimal).as_decimal(), Decimal::new(3, 0));
        assert_eq!(d.get(DataType::String).as_text(), "3");
        assert_eq!(d.get(DataType::Int64).as_int(), 0);
    }
}
