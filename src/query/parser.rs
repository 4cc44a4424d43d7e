use std::collections::HashMap;

pub const PARAM_CONNECTION_STRING: &str = "connection_string";
pub const PARAM_SCHEMA: &str = "schema";
pub const PARAM_TABLE: &str = "table";
pub const PARAM_COLUMNS: &str = "columns";

const EXPR_QUERY: &str = "query=";
const EXPR_FROM: &str = " FROM ";

pub const DEFAULT_MAX_BLOCK_SIZE: usize = 65536;

/// Response streaming knobs taken from request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Rows are coalesced into blocks of roughly this many bytes before each
    /// chunked write.
    pub max_block_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions { max_block_size: DEFAULT_MAX_BLOCK_SIZE }
    }
}

impl StreamOptions {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let max_block_size = params
            .get("max_block_size")
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_MAX_BLOCK_SIZE);
        StreamOptions { max_block_size }
    }
}

/// Drops the optional literal `query=` prefix ClickHouse puts in front of
/// the posted query body.
pub fn strip_query_prefix(body: &str) -> &str {
    body.strip_prefix(EXPR_QUERY).unwrap_or(body)
}

/// Normalizes a generated ClickHouse query down to the table name or embedded
/// query it wraps.
///
/// ClickHouse generates `SELECT ... FROM `...`` around whatever the user put
/// in the table function; when the inner identifier is quoted (optionally
/// schema-qualified) the quoted content is extracted, then standard C-style
/// escapes are resolved. Bare SQL passes through unchanged.
pub fn normalize_query(query: &str) -> String {
    let mut extracted: Option<&str> = None;

    if let Some(from_idx) = query.find(EXPR_FROM) {
        let after = from_idx + EXPR_FROM.len();
        if from_idx > 0 && query.len() > after {
            let bytes = query.as_bytes();
            let quote = bytes[after];
            let start = after + 1;

            let dot = bytes[start.min(bytes.len())..].iter().position(|&b| b == b'.').map(|p| p + start);
            let qualified = dot.is_some_and(|d| {
                d > start && d + 1 < bytes.len() && bytes[d - 1] == quote && bytes[d + 1] == quote
            });

            if qualified {
                let inner = dot.expect("qualified implies dot") + 2;
                if let Some(end) = query.rfind(quote as char) {
                    if end > inner {
                        extracted = Some(&query[inner..end]);
                    }
                }
            } else if quote == b'"' || quote == b'`' {
                if let Some(end) = query.rfind(quote as char) {
                    if end > start {
                        extracted = Some(&query[start..end]);
                    }
                }
            }
        }
    }

    let normalized = extracted.unwrap_or(query).trim();
    unescape(normalized).trim().to_string()
}

// \t \b \n \r \f \' \" \\ only; anything else keeps the backslash
fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some('t') => {
                out.push('\t');
                chars.next();
            }
            Some('b') => {
                out.push('\u{0008}');
                chars.next();
            }
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            Some('r') => {
                out.push('\r');
                chars.next();
            }
            Some('f') => {
                out.push('\u{000C}');
                chars.next();
            }
            Some('\'') => {
                out.push('\'');
                chars.next();
            }
            Some('"') => {
                out.push('"');
                chars.next();
            }
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Returns the first quoted identifier (optionally schema-qualified) that
/// follows a FROM keyword, quotes included, or the input unchanged when
/// nothing parseable is found.
pub fn extract_table_name(query: &str) -> String {
    let bytes = query.as_bytes();
    let lower = query.to_ascii_lowercase();
    let mut search = 0;

    while let Some(pos) = lower[search..].find("from") {
        let pos = search + pos;
        search = pos + 4;

        // must be a standalone keyword
        if pos > 0 && !bytes[pos - 1].is_ascii_whitespace() {
            continue;
        }
        match bytes.get(pos + 4) {
            Some(b) if b.is_ascii_whitespace() => {}
            _ => continue,
        }

        let mut i = pos + 4;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        if let Some(end) = consume_quoted_name(bytes, i) {
            return query[i..end].to_string();
        }
    }

    query.to_string()
}

// consumes `ident` or "ident", then any .`ident` continuations, returning the
// exclusive end offset
fn consume_quoted_name(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = *bytes.get(start)?;
    if quote != b'`' && quote != b'"' {
        return None;
    }

    let mut end = consume_quoted_ident(bytes, start, quote)?;
    while bytes.get(end) == Some(&b'.') && bytes.get(end + 1) == Some(&quote) {
        end = consume_quoted_ident(bytes, end + 1, quote)?;
    }

    Some(end)
}

fn consume_quoted_ident(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
            } else {
                return Some(i + 1);
            }
        } else {
            i += 1;
        }
    }
    None
}
