//! Error types for the transport layer
//!
//! Startup errors ([`ValidationErrors`], [`BindError`]) are fatal and surface to
//! the operator. Per-exchange errors ([`SecurityRejection`], [`SessionError`])
//! are turned into HTTP responses for the one client involved and never affect
//! other sessions.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;

/// Reason a single configuration field was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    #[error("unknown transport type {0:?}, expected \"stdio\" or \"streamable-http\"")]
    UnknownTransportType(String),

    #[error("required field is missing")]
    MissingField,

    #[error("expected {expected}")]
    WrongType { expected: &'static str },

    #[error("must be between {min} and {max}")]
    OutOfRange { min: u64, max: u64 },

    #[error("must not be empty")]
    Empty,

    #[error("{0}")]
    Invalid(String),
}

/// One configuration problem, with the dotted path of the offending field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.field, self.kind)
        }
    }
}

/// Every problem found in a configuration object, in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First error reported for `field`, if any
    pub fn for_field(&self, field: &str) -> Option<&ValidationError> {
        self.0.iter().find(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport configuration validation failed:")?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// The HTTP listener could not be started
#[derive(Debug, Error)]
pub enum BindError {
    #[error("address {addr} is already in use")]
    AddrInUse { addr: String },

    #[error("permission denied binding {addr}")]
    PermissionDenied { addr: String },

    #[error("address {addr} is not available on this host")]
    AddrNotAvailable { addr: String },

    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    pub fn from_io(addr: impl Into<String>, source: io::Error) -> Self {
        let addr = addr.into();
        match source.kind() {
            io::ErrorKind::AddrInUse => Self::AddrInUse { addr },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { addr },
            io::ErrorKind::AddrNotAvailable => Self::AddrNotAvailable { addr },
            _ => Self::Io { addr, source },
        }
    }
}

/// An exchange failed the connection-level security policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityRejection {
    #[error("origin {0:?} is not allowed")]
    OriginNotAllowed(Option<String>),

    #[error("host {0:?} is not allowed")]
    HostNotAllowed(Option<String>),
}

/// Recoverable session registry signals
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },
}

/// Shutdown had to force-close sessions that did not end within the drain window
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("drain timed out after {timeout:?}, force-closed {forced} session(s)")]
pub struct DrainTimeout {
    pub timeout: Duration,
    pub forced: usize,
}

/// A server-initiated message could not be queued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("session has no outbound queue")]
    NoSession,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("outbound queue is closed")]
    Closed,
}

/// Errors surfaced by [`crate::server::TransportFactory::build`]
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ValidationErrors),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}
