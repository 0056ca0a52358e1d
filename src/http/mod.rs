//! Streamable HTTP transport
//!
//! - [`listener`]: socket lifecycle, health check, drain
//! - [`transport`]: per-exchange routing on the protocol endpoint
//! - [`streams`]: outbound queues and SSE channels

pub mod listener;
pub mod streams;
pub mod transport;

pub use listener::{HealthCheck, HttpServerManager, ServerState, ServerStatus};
pub use streams::{OutboundEvent, StreamRegistry};
pub use transport::HttpTransportManager;
