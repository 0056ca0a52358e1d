//! HTTP listener lifecycle
//!
//! Owns the bound socket and the server task. `start` either returns a
//! listening server or an error with nothing left running; `stop` drains
//! sessions and tears the listener down. The state only moves forward:
//! a stopped server is not restarted, a new one is started instead.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{bind_addr, HEALTH_PATH};
use crate::error::{BindError, DrainTimeout};
use crate::session::SessionManager;

/// How long `stop` waits for the server task after sessions are gone.
const LISTENER_CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Starting,
    Listening,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub state: ServerState,
    pub bound_port: u16,
    pub active_session_count: usize,
    /// Time since the listener was bound; `None` once stopped
    pub uptime: Option<Duration>,
}

/// Read-only view of a server's status, shared with the `/health` route
#[derive(Clone)]
pub struct HealthCheck {
    state: watch::Receiver<ServerState>,
    bound_port: u16,
    started_at: Instant,
    sessions: Arc<SessionManager>,
}

impl HealthCheck {
    pub fn status(&self) -> ServerStatus {
        let state = *self.state.borrow();
        ServerStatus {
            state,
            bound_port: self.bound_port,
            active_session_count: self.sessions.len(),
            uptime: (state != ServerState::Stopped).then(|| self.started_at.elapsed()),
        }
    }
}

async fn health(State(check): State<HealthCheck>) -> impl IntoResponse {
    let status = check.status();
    let label = if status.state == ServerState::Listening {
        "healthy"
    } else {
        "unhealthy"
    };
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Json(json!({
        "status": label,
        "state": status.state,
        "port": status.bound_port,
        "activeSessions": status.active_session_count,
        "uptimeMillis": status.uptime.map(|u| u.as_millis() as u64),
        "timestamp": timestamp,
    }))
}

type ServeHandle = JoinHandle<std::result::Result<(), std::io::Error>>;

pub struct HttpServerManager {
    state: watch::Sender<ServerState>,
    check: HealthCheck,
    local_addr: SocketAddr,
    sessions: Arc<SessionManager>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    serve: tokio::sync::Mutex<Option<ServeHandle>>,
}

impl HttpServerManager {
    /// Bind `host:port` and serve `app` plus the health check.
    pub async fn start(
        host: &str,
        port: u16,
        app: Router,
        sessions: Arc<SessionManager>,
    ) -> Result<Self, BindError> {
        let addr = bind_addr(host, port);
        let (state, state_rx) = watch::channel(ServerState::Starting);

        let listener = tokio::net::TcpListener::bind((host.trim_matches(['[', ']']), port))
            .await
            .map_err(|e| BindError::from_io(addr.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(addr.clone(), e))?;

        let check = HealthCheck {
            state: state_rx,
            bound_port: local_addr.port(),
            started_at: Instant::now(),
            sessions: sessions.clone(),
        };
        let app = app.merge(
            Router::new()
                .route(HEALTH_PATH, get(health))
                .with_state(check.clone()),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        state.send_replace(ServerState::Listening);
        info!("HTTP listener bound at http://{}", local_addr);

        Ok(Self {
            state,
            check,
            local_addr,
            sessions,
            shutdown: Mutex::new(Some(shutdown_tx)),
            serve: tokio::sync::Mutex::new(Some(serve)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn status(&self) -> ServerStatus {
        self.check.status()
    }

    pub fn health_check(&self) -> HealthCheck {
        self.check.clone()
    }

    /// Drain and stop.
    ///
    /// Stops accepting connections, waits up to `timeout` for every session to
    /// end, force-closes the rest and waits for the server task. Returns
    /// [`DrainTimeout`] when sessions had to be forced; the server is stopped
    /// either way.
    pub async fn stop(&self, timeout: Duration) -> Result<(), DrainTimeout> {
        let mut serve = self.serve.lock().await;
        if matches!(self.state(), ServerState::Draining | ServerState::Stopped) {
            return Ok(());
        }
        self.state.send_replace(ServerState::Draining);
        info!(
            active_sessions = self.sessions.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Draining HTTP listener"
        );

        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }

        let forced = if self.sessions.wait_until_empty(timeout).await {
            0
        } else {
            let forced = self.sessions.evict_all().await;
            warn!(forced, "Drain timed out, force-closed remaining sessions");
            forced
        };
        self.sessions.stop_sweeper();

        if let Some(mut handle) = serve.take() {
            match tokio::time::timeout(LISTENER_CLOSE_GRACE, &mut handle).await {
                Ok(Ok(Ok(()))) => info!("HTTP listener stopped"),
                Ok(Ok(Err(e))) => error!("HTTP listener error: {}", e),
                Ok(Err(e)) => error!("HTTP listener task failed: {}", e),
                Err(_) => {
                    warn!("HTTP listener did not close in time, aborting");
                    handle.abort();
                }
            }
        }

        self.state.send_replace(ServerState::Stopped);

        if forced > 0 {
            Err(DrainTimeout { timeout, forced })
        } else {
            Ok(())
        }
    }
}

impl Drop for HttpServerManager {
    fn drop(&mut self) {
        if let Some(handle) = self.serve.get_mut().take() {
            handle.abort();
        }
    }
}
