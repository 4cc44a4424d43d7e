use serde::Deserialize;

pub const PARAM_FETCH_SIZE: &str = "fetch_size";
pub const PARAM_MAX_ROWS: &str = "max_rows";
pub const PARAM_NULL_AS_DEFAULT: &str = "null_as_default";
pub const PARAM_OFFSET: &str = "offset";
pub const PARAM_POSITION: &str = "position";
pub const PARAM_DEBUG: &str = "debug";

pub const DEFAULT_FETCH_SIZE: i32 = 1000;

/// Effective per-request knobs after merging. Framework defaults are the
/// baseline; datasource configuration, named query configuration and the
/// request URI each apply their explicitly-set overrides on top, in that
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters {
    pub fetch_size: i32,
    pub max_rows: i32,
    pub offset: i32,
    pub position: i32,
    pub null_as_default: bool,
    pub debug: bool,
    pub show_datasource_column: bool,
    pub show_custom_columns: bool,
}

impl Default for QueryParameters {
    fn default() -> Self {
        QueryParameters {
            fetch_size: DEFAULT_FETCH_SIZE,
            max_rows: 0,
            offset: 0,
            position: 0,
            null_as_default: false,
            debug: false,
            show_datasource_column: false,
            show_custom_columns: false,
        }
    }
}

impl QueryParameters {
    pub fn apply(&mut self, overrides: &ParamOverrides) -> &mut Self {
        if let Some(v) = overrides.fetch_size {
            self.fetch_size = v;
        }
        if let Some(v) = overrides.max_rows {
            self.max_rows = v;
        }
        if let Some(v) = overrides.offset {
            self.offset = v;
        }
        if let Some(v) = overrides.position {
            self.position = v;
        }
        if let Some(v) = overrides.null_as_default {
            self.null_as_default = v;
        }
        if let Some(v) = overrides.debug {
            self.debug = v;
        }
        if let Some(v) = overrides.datasource_column {
            self.show_datasource_column = v;
        }
        if let Some(v) = overrides.custom_columns {
            self.show_custom_columns = v;
        }
        self
    }

    pub fn to_query_string(&self) -> String {
        format!(
            "{PARAM_FETCH_SIZE}={}&{PARAM_MAX_ROWS}={}&{PARAM_OFFSET}={}&{PARAM_POSITION}={}&{PARAM_NULL_AS_DEFAULT}={}",
            self.fetch_size, self.max_rows, self.offset, self.position, self.null_as_default
        )
    }
}

/// Partial parameter set carrying only explicitly-given values, parsed from a
/// connection string's query suffix or from a configuration block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
    pub fetch_size: Option<i32>,
    pub max_rows: Option<i32>,
    pub offset: Option<i32>,
    pub position: Option<i32>,
    pub null_as_default: Option<bool>,
    pub debug: Option<bool>,
    pub datasource_column: Option<bool>,
    pub custom_columns: Option<bool>,
}

impl ParamOverrides {
    /// Extracts recognized parameters from the `?key=value&...` suffix of a
    /// connection string. Unknown keys and unparsable values are ignored.
    pub fn from_uri(uri: &str) -> Self {
        let mut overrides = ParamOverrides::default();

        let Some((_, query)) = uri.split_once('?') else {
            return overrides;
        };

        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };

            match key {
                PARAM_FETCH_SIZE => overrides.fetch_size = value.parse().ok(),
                PARAM_MAX_ROWS => overrides.max_rows = value.parse().ok(),
                PARAM_OFFSET => overrides.offset = value.parse().ok(),
                PARAM_POSITION => overrides.position = value.parse().ok(),
                PARAM_NULL_AS_DEFAULT => overrides.null_as_default = value.parse().ok(),
                PARAM_DEBUG => overrides.debug = value.parse().ok(),
                _ => {}
            }
        }

        overrides
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_render_in_wire_order() {
        assert_eq!(
            QueryParameters::default().to_query_string(),
            "fetch_size=1000&max_rows=0&offset=0&position=0&null_as_default=false"
        );
    }

    #[test]
    fn uri_overrides_only_given_keys() {
        let o = ParamOverrides::from_uri("ch?max_rows=5&debug=true&bogus=1&null_as_default=nope");
        assert_eq!(o.max_rows, Some(5));
        assert_eq!(o.debug, Some(true));
        assert_eq!(o.fetch_size, None);
        assert_eq!(o.null_as_default, None);

        let mut p = QueryParameters::default();
        p.apply(&o);
        assert_eq!(p.max_rows, 5);
        assert_eq!(p.fetch_size, DEFAULT_FETCH_SIZE);
        assert!(p.debug);
    }

    #[test]
    fn later_overrides_win() {
        let mut p = QueryParameters::default();
        p.apply(&ParamOverrides { fetch_size: Some(10), offset: Some(2), ..Default::default() });
        p.apply(&ParamOverrides::from_uri("x?fetch_size=20"));
        assert_eq!(p.fetch_size, 20);
        assert_eq!(p.offset, 2);
    }

    #[test]
    fn uri_without_query_changes_nothing() {
        assert_eq!(ParamOverrides::from_uri("just-an-id"), ParamOverrides::default());
    }
}
