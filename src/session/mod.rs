//! Protocol session management
//!
//! Sessions are process-local: a removed session is gone, and clients holding
//! its id must run the handshake again.

pub mod manager;
pub mod types;

pub use manager::SessionManager;
pub use types::{ChannelHandle, OutboundRelease, Session, SessionId, SessionState};
