//! Connection-level security policy for the HTTP transport
//!
//! Checks run before any session lookup, so a rejected exchange learns
//! nothing about which sessions exist.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::config::SecurityConfig;
use crate::error::SecurityRejection;

/// Header carrying the session id in both directions
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("content-security-policy", "default-src 'none'"),
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
];

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    config: SecurityConfig,
}

impl SecurityPolicy {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// A request without an `Origin` header is rejected.
    pub fn validate_origin(&self, origin: Option<&str>) -> Result<(), SecurityRejection> {
        match origin {
            Some(origin) if self.config.allowed_origins.iter().any(|r| r.matches(origin)) => Ok(()),
            other => Err(SecurityRejection::OriginNotAllowed(other.map(str::to_string))),
        }
    }

    /// DNS rebinding protection: the `Host` header, minus its port, must be allow-listed.
    pub fn validate_host(&self, host: Option<&str>) -> Result<(), SecurityRejection> {
        if !self.config.dns_rebinding_protection {
            return Ok(());
        }
        let allowed = host
            .map(hostname)
            .map(|name| self.config.allowed_hosts.contains(&name))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(SecurityRejection::HostNotAllowed(host.map(str::to_string)))
        }
    }

    /// Full exchange check, origin first.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), SecurityRejection> {
        self.validate_origin(header_str(headers, &header::ORIGIN))?;
        self.validate_host(header_str(headers, &header::HOST))
    }

    /// Add the hardening headers without overriding values already set.
    pub fn apply_security_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in SECURITY_HEADERS {
            headers
                .entry(HeaderName::from_static(name))
                .or_insert(HeaderValue::from_static(value));
        }
    }

    /// Headers letting a browser at `origin` read the response.
    pub fn apply_cors_headers(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        let Some(origin) = origin else {
            return;
        };
        if self.validate_origin(Some(origin)).is_err() {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.insert(
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static("Mcp-Session-Id"),
            );
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
    }

    /// Preflight response headers; empty for disallowed origins.
    pub fn preflight_headers(&self, origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if origin.is_none() || self.validate_origin(origin).is_err() {
            return headers;
        }
        self.apply_cors_headers(origin, &mut headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Mcp-Session-Id, Last-Event-ID"),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
        headers
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `localhost:3000` -> `localhost`, `[::1]:8080` -> `::1`
fn hostname(host: &str) -> String {
    let host = host.trim();
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if host.matches(':').count() > 1 {
        // bare IPv6 literal, no port
        host
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
            .map(|(name, _)| name)
            .unwrap_or(host)
    };
    name.to_ascii_lowercase()
}
