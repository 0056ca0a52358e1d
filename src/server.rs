//! Transport construction and orchestration

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::config::{HttpConfig, TransportConfig};
use crate::engine::ProtocolEngine;
use crate::error::{BindError, DrainTimeout, TransportError};
use crate::http::{HealthCheck, HttpServerManager, HttpTransportManager, ServerStatus, StreamRegistry};
use crate::session::{OutboundRelease, SessionManager};
use crate::stdio::StdioTransport;
use crate::validator::validate;

/// Builds a ready-to-serve transport from validated configuration
pub struct TransportFactory;

impl TransportFactory {
    /// Start the transport selected by `config`.
    ///
    /// HTTP transports are listening when this returns; a bind failure
    /// leaves nothing running.
    pub async fn build(
        config: TransportConfig,
        engine: Arc<dyn ProtocolEngine>,
    ) -> Result<Transport, TransportError> {
        tracing::info!(transport = config.kind(), "Building transport");
        match config {
            TransportConfig::Stdio(config) => {
                Ok(Transport::Stdio(StdioTransport::new(config, engine)))
            }
            TransportConfig::StreamableHttp(config) => {
                Ok(Transport::Http(HttpTransport::start(config, engine).await?))
            }
        }
    }

    /// Validate a raw configuration object, then [`build`](Self::build).
    pub async fn from_value(
        raw: &Value,
        engine: Arc<dyn ProtocolEngine>,
    ) -> Result<Transport, TransportError> {
        let config = validate(raw)?;
        Self::build(config, engine).await
    }
}

pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Http(_) => "streamable-http",
        }
    }

    /// Serve until the transport finishes or `shutdown` resolves.
    ///
    /// Stdio finishes when its input closes. HTTP runs until `shutdown`,
    /// then drains for at most `drain_timeout`; a forced drain is logged,
    /// not returned.
    pub async fn run_until<F>(self, shutdown: F, drain_timeout: Duration) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        match self {
            Self::Stdio(stdio) => {
                tokio::select! {
                    result = stdio.serve() => result,
                    _ = shutdown => {
                        tracing::info!("Shutdown requested, stopping stdio transport");
                        Ok(())
                    }
                }
            }
            Self::Http(http) => {
                shutdown.await;
                tracing::info!("Shutdown requested, draining HTTP transport");
                if let Err(e) = http.close(drain_timeout).await {
                    tracing::warn!("{}", e);
                }
                Ok(())
            }
        }
    }
}

/// A listening Streamable HTTP transport
pub struct HttpTransport {
    config: HttpConfig,
    server: HttpServerManager,
    transport: HttpTransportManager,
}

impl HttpTransport {
    pub async fn start(config: HttpConfig, engine: Arc<dyn ProtocolEngine>) -> Result<Self, BindError> {
        let streams = Arc::new(StreamRegistry::new(
            config.outbound_buffer,
            config.session.eviction_grace(),
        ));
        let release: Weak<dyn OutboundRelease> = Arc::downgrade(&streams) as Weak<dyn OutboundRelease>;
        let sessions = Arc::new(SessionManager::new(config.session.clone()).with_outbound(release));
        let transport = HttpTransportManager::new(&config, sessions.clone(), streams, engine);

        let server =
            HttpServerManager::start(&config.host, config.port, transport.router(), sessions.clone())
                .await?;
        sessions.start_sweeper();

        tracing::info!(
            endpoint = %config.endpoint,
            max_sessions = config.session.max_sessions,
            ttl_ms = config.session.ttl_millis,
            "Streamable HTTP transport ready at http://{}{}",
            server.local_addr(),
            config.endpoint
        );

        Ok(Self {
            config,
            server,
            transport,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn status(&self) -> ServerStatus {
        self.server.status()
    }

    pub fn health_check(&self) -> HealthCheck {
        self.server.health_check()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.transport.sessions()
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        self.transport.streams()
    }

    /// Drain and stop the listener.
    pub async fn close(&self, timeout: Duration) -> Result<(), DrainTimeout> {
        self.server.stop(timeout).await
    }
}
