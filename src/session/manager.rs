//! In-memory session registry with TTL sweeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::{future, stream, StreamExt};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::types::{ChannelHandle, OutboundRelease, Session, SessionId, SessionState};
use crate::config::SessionConfig;
use crate::error::SessionError;

/// Evictions one sweep runs concurrently.
const SWEEP_BATCH: usize = 64;

/// Registry of protocol sessions.
///
/// The lock is never held across an await on another component: eviction
/// marks the session `Closing`, releases the lock while the outbound channel
/// shuts down, then re-checks the registry before removing the entry.
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, Session>>,
    outbound: Option<Weak<dyn OutboundRelease>>,
    count_tx: watch::Sender<usize>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            outbound: None,
            count_tx,
            sweeper: Mutex::new(None),
        }
    }

    /// Attach the owner of the sessions' outbound channels.
    pub fn with_outbound(mut self, outbound: Weak<dyn OutboundRelease>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a new `Pending` session.
    pub async fn create(&self, client_info: Option<Value>) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_sessions {
            warn!(
                max_sessions = self.config.max_sessions,
                "Rejecting handshake: session capacity reached"
            );
            return Err(SessionError::CapacityExceeded {
                max: self.config.max_sessions,
            });
        }

        let mut session = Session::new(client_info);
        // Two clients never share an id.
        while sessions.contains_key(&session.id) {
            session.id = SessionId::generate();
        }
        sessions.insert(session.id.clone(), session.clone());
        self.count_tx.send_replace(sessions.len());

        info!(session_id = %session.id, active = sessions.len(), "Session created");
        Ok(session)
    }

    /// Mark a handshake as completed.
    pub async fn activate(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) if session.is_live() => {
                session.state = SessionState::Active;
                session.last_active_at = Instant::now();
                Ok(())
            }
            _ => Err(SessionError::NotFound(id.clone())),
        }
    }

    /// Look a session up without refreshing it.
    pub async fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|s| s.is_live())
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub async fn touch(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) if session.is_live() => {
                session.last_active_at = Instant::now();
                Ok(())
            }
            _ => Err(SessionError::NotFound(id.clone())),
        }
    }

    pub async fn bind_outbound(
        &self,
        id: &SessionId,
        handle: ChannelHandle,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) if session.is_live() => {
                session.outbound = Some(handle);
                Ok(())
            }
            _ => Err(SessionError::NotFound(id.clone())),
        }
    }

    /// Close a session and remove it from the registry.
    ///
    /// Returns the final `Closed` snapshot. A second concurrent eviction of
    /// the same id reports `NotFound`.
    pub async fn evict(&self, id: &SessionId) -> Result<Session, SessionError> {
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(id) {
                Some(session) if session.is_live() => session.state = SessionState::Closing,
                _ => return Err(SessionError::NotFound(id.clone())),
            }
        }

        let grace = self.config.eviction_grace();
        if let Some(outbound) = self.outbound.as_ref().and_then(Weak::upgrade) {
            if !outbound.release(id, grace).await {
                warn!(
                    session_id = %id,
                    grace_ms = grace.as_millis() as u64,
                    "Outbound channel did not confirm closure, force-removing session"
                );
            }
        }

        let mut sessions = self.sessions.write().await;
        let still_closing = sessions
            .get(id)
            .map(|s| s.state == SessionState::Closing)
            .unwrap_or(false);
        if !still_closing {
            return Err(SessionError::NotFound(id.clone()));
        }
        let mut session = sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        session.state = SessionState::Closed;
        session.outbound = None;
        self.count_tx.send_replace(sessions.len());

        info!(session_id = %id, active = sessions.len(), "Session closed");
        Ok(session)
    }

    /// Evict every live session, returning how many were closed.
    pub async fn evict_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        let mut closed = 0;
        for id in ids {
            if self.evict(&id).await.is_ok() {
                closed += 1;
            }
        }
        closed
    }

    /// Evict sessions idle for longer than the TTL.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.config.ttl();
        let now = Instant::now();
        let expired: Vec<(SessionId, Duration)> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_live())
            .filter_map(|s| {
                let idle = s.idle_for(now);
                (idle > ttl).then(|| (s.id.clone(), idle))
            })
            .collect();

        // One stalled channel release occupies a single slot, not the sweep.
        let evicted = stream::iter(expired)
            .map(|(id, idle)| async move { self.expire(&id, idle, ttl).await })
            .buffer_unordered(SWEEP_BATCH)
            .filter(|expired| future::ready(*expired))
            .count()
            .await;

        if evicted > 0 {
            debug!(evicted, "Sweep completed");
        }
        evicted
    }

    async fn expire(&self, id: &SessionId, idle: Duration, ttl: Duration) -> bool {
        // The client may have come back between the scan and now.
        let still_idle = match self.sessions.read().await.get(id) {
            Some(s) => s.is_live() && s.idle_for(Instant::now()) > ttl,
            None => false,
        };
        if !still_idle || self.evict(id).await.is_err() {
            return false;
        }
        info!(session_id = %id, idle_ms = idle.as_millis() as u64, "Session expired");
        true
    }

    /// Spawn the periodic TTL sweep. Calling this twice is a no-op.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let interval = self.config.sweep_interval();
        info!(
            interval_ms = self.config.sweep_interval_millis,
            ttl_ms = self.config.ttl_millis,
            "Starting session sweeper"
        );

        let manager = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Sweeps overlap when a release waits out its grace period;
            // aborting the sweeper aborts them with the set.
            let mut sweeps = JoinSet::new();
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                while sweeps.try_join_next().is_some() {}
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                sweeps.spawn(async move {
                    manager.sweep_expired().await;
                });
            }
        }));
    }

    pub fn stop_sweeper(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Stopped session sweeper");
        }
    }

    pub async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Number of registry entries, including sessions still closing.
    pub fn len(&self) -> usize {
        *self.count_tx.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the registry is empty; `false` if `timeout` elapsed first.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut count = self.count_tx.subscribe();
        let emptied = matches!(
            tokio::time::timeout(timeout, count.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        emptied
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
