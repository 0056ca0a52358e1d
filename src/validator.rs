//! Raw configuration validation
//!
//! Turns an untyped configuration object into a [`TransportConfig`]. Every
//! field is checked before a result is produced and all problems are reported
//! together, each tagged with its dotted field path. Unknown fields are
//! ignored so newer config files keep working with older binaries.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::config::{
    HttpConfig, OriginRule, SecurityConfig, SessionConfig, StdioConfig, TransportConfig,
    DEFAULT_ALLOWED_HOSTS, DEFAULT_ALLOWED_ORIGINS, DEFAULT_ENDPOINT,
    DEFAULT_EVICTION_GRACE_MILLIS, DEFAULT_HOST, DEFAULT_MAX_SESSIONS, DEFAULT_OUTBOUND_BUFFER,
    DEFAULT_SSE_KEEP_ALIVE_MILLIS, DEFAULT_SWEEP_INTERVAL_MILLIS, DEFAULT_TTL_MILLIS, HEALTH_PATH,
};
use crate::error::{ValidationError, ValidationErrorKind, ValidationErrors};

/// Validate a raw configuration object
pub fn validate(raw: &Value) -> Result<TransportConfig, ValidationErrors> {
    let mut errors = Errors::default();

    let Some(root) = raw.as_object() else {
        errors.push("", ValidationErrorKind::WrongType { expected: "an object" });
        return Err(errors.finish());
    };

    let config = match root.get("type") {
        None => {
            errors.push("type", ValidationErrorKind::MissingField);
            None
        }
        Some(Value::String(tag)) if tag == "stdio" => {
            Some(TransportConfig::Stdio(stdio_config(root, &mut errors)))
        }
        Some(Value::String(tag)) if tag == "streamable-http" => {
            http_config(root, &mut errors).map(TransportConfig::StreamableHttp)
        }
        Some(other) => {
            let tag = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            errors.push("type", ValidationErrorKind::UnknownTransportType(tag));
            None
        }
    };

    match config {
        Some(config) if errors.is_empty() => Ok(config),
        _ => Err(errors.finish()),
    }
}

#[derive(Default)]
struct Errors(Vec<ValidationError>);

impl Errors {
    fn push(&mut self, field: &str, kind: ValidationErrorKind) {
        self.0.push(ValidationError::new(field, kind));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn finish(self) -> ValidationErrors {
        ValidationErrors(self.0)
    }
}

fn stdio_config(root: &Map<String, Value>, errors: &mut Errors) -> StdioConfig {
    let outbound_buffer = positive_int(root, "outbound_buffer", "outbound_buffer", errors)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_OUTBOUND_BUFFER);
    StdioConfig { outbound_buffer }
}

fn http_config(root: &Map<String, Value>, errors: &mut Errors) -> Option<HttpConfig> {
    let port = match root.get("port") {
        None => {
            errors.push("port", ValidationErrorKind::MissingField);
            None
        }
        Some(value) => match value.as_u64() {
            Some(p @ 1..=65535) => Some(p as u16),
            Some(_) => {
                errors.push("port", ValidationErrorKind::OutOfRange { min: 1, max: 65535 });
                None
            }
            None if value.is_i64() => {
                errors.push("port", ValidationErrorKind::OutOfRange { min: 1, max: 65535 });
                None
            }
            None => {
                errors.push("port", ValidationErrorKind::WrongType { expected: "an integer" });
                None
            }
        },
    };

    let host = non_empty_string(root, "host", "host", errors).unwrap_or(DEFAULT_HOST.to_string());

    let endpoint = match non_empty_string(root, "endpoint", "endpoint", errors) {
        Some(path) if !path.starts_with('/') => {
            errors.push(
                "endpoint",
                ValidationErrorKind::Invalid("must start with '/'".into()),
            );
            DEFAULT_ENDPOINT.to_string()
        }
        Some(path) if path == HEALTH_PATH => {
            errors.push(
                "endpoint",
                ValidationErrorKind::Invalid(format!("{HEALTH_PATH} is reserved for the health check")),
            );
            DEFAULT_ENDPOINT.to_string()
        }
        Some(path) => path,
        None => DEFAULT_ENDPOINT.to_string(),
    };

    let sse_keep_alive_millis =
        positive_int(root, "sse_keep_alive_millis", "sse_keep_alive_millis", errors)
            .unwrap_or(DEFAULT_SSE_KEEP_ALIVE_MILLIS);
    let outbound_buffer = positive_int(root, "outbound_buffer", "outbound_buffer", errors)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_OUTBOUND_BUFFER);

    let security = match section(root, "security", errors) {
        Some(section) => security_config(section, errors),
        None => SecurityConfig::default(),
    };
    let session = match section(root, "session", errors) {
        Some(section) => session_config(section, errors),
        None => SessionConfig::default(),
    };

    Some(HttpConfig {
        host,
        port: port?,
        endpoint,
        sse_keep_alive_millis,
        outbound_buffer,
        security,
        session,
    })
}

fn security_config(section: &Map<String, Value>, errors: &mut Errors) -> SecurityConfig {
    let allowed_origins = match string_list(section, "allowed_origins", "security.allowed_origins", errors) {
        Some(raw) => {
            let mut rules = BTreeSet::new();
            for (i, origin) in raw.iter().enumerate() {
                match OriginRule::parse(origin) {
                    Some(rule) => {
                        rules.insert(rule);
                    }
                    None => errors.push(
                        &format!("security.allowed_origins.{i}"),
                        ValidationErrorKind::Invalid(format!(
                            "{origin:?} is not an origin, \"*\" or \"scheme://host:*\""
                        )),
                    ),
                }
            }
            rules
        }
        None => DEFAULT_ALLOWED_ORIGINS
            .iter()
            .filter_map(|o| OriginRule::parse(o))
            .collect(),
    };

    let dns_rebinding_protection = match section.get("dns_rebinding_protection") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            errors.push(
                "security.dns_rebinding_protection",
                ValidationErrorKind::WrongType { expected: "a boolean" },
            );
            true
        }
    };

    let allowed_hosts: BTreeSet<String> =
        match string_list(section, "allowed_hosts", "security.allowed_hosts", errors) {
            Some(raw) => raw
                .into_iter()
                .filter(|h| !h.is_empty())
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            None => DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
        };

    if dns_rebinding_protection && allowed_hosts.is_empty() {
        errors.push(
            "security.allowed_hosts",
            ValidationErrorKind::Invalid(
                "must not be empty when dns_rebinding_protection is enabled".into(),
            ),
        );
    }

    SecurityConfig {
        allowed_origins,
        dns_rebinding_protection,
        allowed_hosts,
    }
}

fn session_config(section: &Map<String, Value>, errors: &mut Errors) -> SessionConfig {
    let ttl_millis =
        positive_int(section, "ttl_millis", "session.ttl_millis", errors).unwrap_or(DEFAULT_TTL_MILLIS);
    let sweep_interval_millis = positive_int(
        section,
        "sweep_interval_millis",
        "session.sweep_interval_millis",
        errors,
    )
    .unwrap_or_else(|| DEFAULT_SWEEP_INTERVAL_MILLIS.min((ttl_millis / 2).max(1)));
    let max_sessions = positive_int(section, "max_sessions", "session.max_sessions", errors)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MAX_SESSIONS);
    let eviction_grace_millis = positive_int(
        section,
        "eviction_grace_millis",
        "session.eviction_grace_millis",
        errors,
    )
    .unwrap_or(DEFAULT_EVICTION_GRACE_MILLIS);

    if sweep_interval_millis > ttl_millis {
        errors.push(
            "session.sweep_interval_millis",
            ValidationErrorKind::Invalid(format!(
                "must not exceed session.ttl_millis ({ttl_millis})"
            )),
        );
    }

    SessionConfig {
        ttl_millis,
        sweep_interval_millis,
        max_sessions,
        eviction_grace_millis,
    }
}

fn section<'a>(
    root: &'a Map<String, Value>,
    key: &str,
    errors: &mut Errors,
) -> Option<&'a Map<String, Value>> {
    match root.get(key) {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            errors.push(key, ValidationErrorKind::WrongType { expected: "an object" });
            None
        }
    }
}

fn positive_int(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Errors,
) -> Option<u64> {
    let value = map.get(key)?;
    match value.as_u64() {
        Some(0) => {
            errors.push(path, ValidationErrorKind::OutOfRange { min: 1, max: u64::MAX });
            None
        }
        Some(n) => Some(n),
        None if value.is_i64() => {
            errors.push(path, ValidationErrorKind::OutOfRange { min: 1, max: u64::MAX });
            None
        }
        None => {
            errors.push(path, ValidationErrorKind::WrongType { expected: "a positive integer" });
            None
        }
    }
}

fn non_empty_string(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Errors,
) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if s.trim().is_empty() => {
            errors.push(path, ValidationErrorKind::Empty);
            None
        }
        Value::String(s) => Some(s.clone()),
        _ => {
            errors.push(path, ValidationErrorKind::WrongType { expected: "a string" });
            None
        }
    }
}

fn string_list(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Errors,
) -> Option<Vec<String>> {
    let Value::Array(items) = map.get(key)? else {
        errors.push(path, ValidationErrorKind::WrongType { expected: "an array of strings" });
        return None;
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::String(s) => out.push(s.clone()),
            _ => errors.push(
                &format!("{path}.{i}"),
                ValidationErrorKind::WrongType { expected: "a string" },
            ),
        }
    }
    Some(out)
}
