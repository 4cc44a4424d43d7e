use std::net::ToSocketAddrs;

use tracing::debug;

const VARIABLE_PREFIX: &str = "{{";
const VARIABLE_SUFFIX: &str = "}}";

/// Replaces `{{ ... }}` placeholders in a template. The operator returns the
/// substitution for a trimmed variable name, or `None` to keep the literal
/// `{{` and continue scanning.
pub fn apply_variables(template: &str, op: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < template.len() {
        let Some(start) = template[i..].find(VARIABLE_PREFIX).map(|p| p + i) else {
            out.push_str(&template[i..]);
            break;
        };

        out.push_str(&template[i..start]);

        let Some(end) = template[start..].find(VARIABLE_SUFFIX).map(|p| p + start) else {
            out.push_str(&template[start..]);
            break;
        };

        let variable = template[start + VARIABLE_PREFIX.len()..end].trim();
        match op(variable) {
            Some(value) => {
                out.push_str(&value);
                i = end + VARIABLE_SUFFIX.len();
            }
            None => {
                out.push_str(VARIABLE_PREFIX);
                i = start + VARIABLE_PREFIX.len();
            }
        }
    }

    out
}

/// Resolves service names referenced from connection strings and driver
/// properties. `{{name}}` expands to `host:port`, `{{host:name}}` and
/// `{{port:name}}` to the individual parts; unresolvable names keep their
/// literal `{{...}}` text.
pub trait NameResolver: Send + Sync {
    /// Looks a service name up to a host and port.
    fn lookup(&self, name: &str) -> Option<(String, u16)>;

    fn resolve(&self, template: &str) -> String {
        apply_variables(template, |variable| {
            if let Some(name) = variable.strip_prefix("host:") {
                self.lookup(name.trim()).map(|(host, _)| host)
            } else if let Some(name) = variable.strip_prefix("port:") {
                self.lookup(name.trim()).map(|(_, port)| port.to_string())
            } else {
                self.lookup(variable).map(|(host, port)| format!("{host}:{port}"))
            }
        })
    }
}

/// Resolver backed by the operating system resolver. Understands plain
/// `host:port` names; service records need a dedicated resolver
/// implementation plugged in instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl NameResolver for SystemResolver {
    fn lookup(&self, name: &str) -> Option<(String, u16)> {
        let (_, port) = name.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;

        match name.to_socket_addrs() {
            Ok(mut addrs) => addrs.next().map(|addr| (addr.ip().to_string(), port)),
            Err(e) => {
                debug!("Not able to resolve [{name}]: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StubResolver(HashMap<String, (String, u16)>);

    impl NameResolver for StubResolver {
        fn lookup(&self, name: &str) -> Option<(String, u16)> {
            self.0.get(name).cloned()
        }
    }

    fn stub() -> StubResolver {
        StubResolver(HashMap::from([("sip.example".to_string(), ("1.2.3.4".to_string(), 5060))]))
    }

    #[test]
    fn apply_variables_basics() {
        let vars = HashMap::from([("var #1", "value 1"), ("var2", "value 2")]);
        let op = |name: &str| vars.get(name).map(|v| v.to_string());

        assert_eq!(apply_variables("", &op), "");
        assert_eq!(apply_variables("test template without any variable", &op), "test template without any variable");
        assert_eq!(apply_variables("template: {{ var #1 }}", &op), "template: value 1");
        assert_eq!(apply_variables("{{var2}}", &op), "value 2");
        assert_eq!(apply_variables("{{}}", &op), "{{}}");
        assert_eq!(apply_variables("{{unknown}} x", &op), "{{unknown}} x");
        assert_eq!(apply_variables("tail {{", &op), "tail {{");
    }

    #[test]
    fn resolve_expands_host_and_port() {
        let r = stub();
        assert_eq!(r.resolve("jdbc://{{ sip.example }}/db"), "jdbc://1.2.3.4:5060/db");
        assert_eq!(r.resolve("{{host:sip.example}}"), "1.2.3.4");
        assert_eq!(r.resolve("{{port:sip.example}}"), "5060");
    }

    #[test]
    fn unresolvable_names_keep_the_literal() {
        let r = stub();
        assert_eq!(r.resolve("jdbc://{{ nowhere.example }}/db"), "jdbc://{{ nowhere.example }}/db");
    }
}
