//! Session data types.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque session identifier (hyphenated lowercase UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh id from the OS random source.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Accepts only hyphenated UUID v4 strings, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 36 {
            return None;
        }
        let uuid = Uuid::parse_str(raw).ok()?;
        if uuid.get_version_num() != 4 || uuid.get_variant() != uuid::Variant::RFC4122 {
            return None;
        }
        Some(Self(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created by a handshake whose response has not been produced yet
    Pending,
    Active,
    /// Eviction in progress; the session is no longer reachable
    Closing,
    Closed,
}

/// Lookup handle for the outbound channel currently bound to a session.
///
/// The channel itself lives in the transport's stream registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub generation: u64,
}

/// Snapshot of a session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_active_at: Instant,
    pub state: SessionState,
    pub outbound: Option<ChannelHandle>,
    /// `clientInfo` from the handshake parameters, if the client sent one
    pub client_info: Option<Value>,
}

impl Session {
    pub(crate) fn new(client_info: Option<Value>) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::generate(),
            created_at: now,
            last_active_at: now,
            state: SessionState::Pending,
            outbound: None,
            client_info,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active_at)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Pending | SessionState::Active)
    }
}

/// Owner of the outbound channels the session registry refers to.
#[async_trait]
pub trait OutboundRelease: Send + Sync {
    /// Close the session's channel and drop its queue.
    ///
    /// Returns `true` once the channel confirmed closure, `false` if `grace`
    /// elapsed first.
    async fn release(&self, id: &SessionId, grace: Duration) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_back() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn parse_normalizes_case() {
        let id = SessionId::generate();
        let upper = id.as_str().to_uppercase();
        assert_eq!(SessionId::parse(&upper), Some(id));
    }

    #[test]
    fn parse_rejects_other_formats() {
        for raw in [
            "",
            "not-a-session",
            // v1 uuid
            "c232ab00-9414-11ec-b3c8-9f6bdeced846",
            // wrong variant nibble
            "550e8400-e29b-41d4-c716-446655440000",
            // simple (unhyphenated) form
            "550e8400e29b41d4a716446655440000",
        ] {
            assert_eq!(SessionId::parse(raw), None, "{raw}");
        }
        assert!(SessionId::parse("550e8400-e29b-41d4-a716-446655440000").is_some());
    }
}
