//! TD MCP Transport - Transport and session layer for a JSON-RPC tool endpoint
//!
//! Serves a [`ProtocolEngine`] over one of two transports:
//!
//! - **stdio**: line-delimited JSON-RPC over stdin/stdout, one implicit session
//! - **streamable-http**: POST for requests, GET for a server-to-client SSE
//!   stream, DELETE to end a session; many concurrent sessions keyed by the
//!   `Mcp-Session-Id` header
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jsonrpsee::RpcModule;
//! use td_mcp_transport::{RpcModuleEngine, TransportFactory};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut module = RpcModule::new(());
//! module.register_method("ping", |_, _, _| "pong")?;
//! let engine = Arc::new(RpcModuleEngine::new(module));
//!
//! let raw = serde_json::json!({ "type": "streamable-http", "port": 6280 });
//! let transport = TransportFactory::from_value(&raw, engine).await?;
//!
//! let shutdown = async {
//!     let _ = tokio::signal::ctrl_c().await;
//! };
//! transport.run_until(shutdown, Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod security;
pub mod server;
pub mod session;
pub mod stdio;
pub mod validator;

// Re-export main API
pub use config::{HttpConfig, OriginRule, SecurityConfig, SessionConfig, StdioConfig, TransportConfig};
pub use engine::{Outbound, ProtocolEngine, RpcModuleEngine, SessionContext};
pub use error::{
    BindError, DrainTimeout, PushError, SecurityRejection, SessionError, TransportError,
    ValidationError, ValidationErrors,
};
pub use http::{HttpServerManager, HttpTransportManager, ServerState, ServerStatus};
pub use security::SecurityPolicy;
pub use server::{HttpTransport, Transport, TransportFactory};
pub use session::{Session, SessionId, SessionManager, SessionState};
pub use stdio::StdioTransport;
pub use validator::validate;
