//! Configuration types for transport servers
//!
//! These are the *validated* shapes. Raw configuration objects go through
//! [`crate::validator::validate`] first; nothing here re-checks invariants.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_ENDPOINT: &str = "/mcp";
pub const HEALTH_PATH: &str = "/health";
pub const DEFAULT_OUTBOUND_BUFFER: usize = 1024;
pub const DEFAULT_SSE_KEEP_ALIVE_MILLIS: u64 = 15_000;

pub const DEFAULT_TTL_MILLIS: u64 = 60 * 60 * 1000;
pub const DEFAULT_SWEEP_INTERVAL_MILLIS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MAX_SESSIONS: usize = 100;
pub const DEFAULT_EVICTION_GRACE_MILLIS: u64 = 5_000;

pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:*", "http://127.0.0.1:*"];
pub const DEFAULT_ALLOWED_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// `host:port`, with IPv6 literals bracketed
pub fn bind_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Complete transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    StreamableHttp(HttpConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::StreamableHttp(_) => "streamable-http",
        }
    }
}

/// Stdio (line-delimited JSON-RPC) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdioConfig {
    /// Capacity of the queue feeding stdout (responses and pushes)
    pub outbound_buffer: usize,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Streamable HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Path serving POST/GET/DELETE for the protocol
    pub endpoint: String,
    pub sse_keep_alive_millis: u64,
    /// Per-session capacity of the server-to-client queue
    pub outbound_buffer: usize,
    pub security: SecurityConfig,
    pub session: SessionConfig,
}

impl HttpConfig {
    /// Localhost config with default security and session settings
    pub fn new(port: u16) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sse_keep_alive_millis: DEFAULT_SSE_KEEP_ALIVE_MILLIS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            security: SecurityConfig::default(),
            session: SessionConfig::default(),
        }
    }

    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_millis(self.sse_keep_alive_millis)
    }
}

/// Connection-level security policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityConfig {
    pub allowed_origins: BTreeSet<OriginRule>,
    pub dns_rebinding_protection: bool,
    pub allowed_hosts: BTreeSet<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .filter_map(|o| OriginRule::parse(o))
                .collect(),
            dns_rebinding_protection: true,
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// One entry of the origin allow-list
///
/// `*` is only meaningful as the whole rule or as the port of a
/// `scheme://host:*` rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OriginRule {
    Any,
    /// `scheme://host` with any (or no) port
    AnyPort(String),
    Exact(String),
}

impl OriginRule {
    /// Returns `None` for rules using `*` anywhere but the supported positions
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "*" {
            return Some(Self::Any);
        }
        if let Some(base) = raw.strip_suffix(":*") {
            if base.is_empty() || base.contains('*') || !base.contains("://") {
                return None;
            }
            return Some(Self::AnyPort(base.to_string()));
        }
        if raw.is_empty() || raw.contains('*') {
            return None;
        }
        Some(Self::Exact(raw.to_string()))
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(allowed) => allowed == origin,
            Self::AnyPort(base) => match origin.strip_prefix(base.as_str()) {
                Some("") => true,
                Some(rest) => rest
                    .strip_prefix(':')
                    .map(|port| {
                        !port.is_empty()
                            && port.len() <= 5
                            && port.bytes().all(|b| b.is_ascii_digit())
                    })
                    .unwrap_or(false),
                None => false,
            },
        }
    }
}

impl fmt::Display for OriginRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::AnyPort(base) => write!(f, "{}:*", base),
            Self::Exact(origin) => f.write_str(origin),
        }
    }
}

impl Serialize for OriginRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Session lifetime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub ttl_millis: u64,
    pub sweep_interval_millis: u64,
    pub max_sessions: usize,
    /// How long eviction waits for the outbound channel to confirm closure
    pub eviction_grace_millis: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_millis)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_millis: DEFAULT_TTL_MILLIS,
            sweep_interval_millis: DEFAULT_SWEEP_INTERVAL_MILLIS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            eviction_grace_millis: DEFAULT_EVICTION_GRACE_MILLIS,
        }
    }
}
