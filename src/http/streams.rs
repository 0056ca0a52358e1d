//! Per-session outbound queues and the SSE channels draining them
//!
//! Each session owns one bounded queue. At most one live channel holds the
//! queue's receiver at a time; opening a new channel shuts the previous one
//! down and waits for it to hand the receiver back, so messages are never
//! delivered out of enqueue order and two channels never read concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::PushError;
use crate::session::{ChannelHandle, OutboundRelease, SessionId};

/// One server-initiated message, numbered per session
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub id: u64,
    pub message: Value,
}

struct QueueSlot {
    epoch: u64,
    rx: Option<mpsc::Receiver<Value>>,
}

struct ActiveChannel {
    handle: ChannelHandle,
    shutdown: oneshot::Sender<()>,
    done: oneshot::Receiver<()>,
}

struct StreamEntry {
    tx: Mutex<mpsc::Sender<Value>>,
    slot: Arc<Mutex<QueueSlot>>,
    event_ids: Arc<AtomicU64>,
    // Serializes open/release for one session; held across the handover wait.
    active: tokio::sync::Mutex<Option<ActiveChannel>>,
}

impl StreamEntry {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(tx),
            slot: Arc::new(Mutex::new(QueueSlot {
                epoch: 0,
                rx: Some(rx),
            })),
            event_ids: Arc::new(AtomicU64::new(0)),
            active: tokio::sync::Mutex::new(None),
        }
    }
}

/// Connection table of the HTTP transport
pub struct StreamRegistry {
    entries: Mutex<HashMap<SessionId, Arc<StreamEntry>>>,
    generations: AtomicU64,
    capacity: usize,
    handover_grace: Duration,
}

impl StreamRegistry {
    pub fn new(capacity: usize, handover_grace: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            capacity: capacity.max(1),
            handover_grace,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<StreamEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: &SessionId) -> Option<Arc<StreamEntry>> {
        self.entries().get(id).cloned()
    }

    /// Create the session's queue. Existing queues are kept.
    pub fn register(&self, id: &SessionId) {
        let capacity = self.capacity;
        self.entries()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(StreamEntry::new(capacity)));
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries().contains_key(id)
    }

    /// Queue a message for the session's current (or next) channel.
    pub fn push(&self, id: &SessionId, message: Value) -> Result<(), PushError> {
        let entry = self.entry(id).ok_or(PushError::NoSession)?;
        let tx = entry.tx.lock().unwrap_or_else(PoisonError::into_inner).clone();
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Open a channel for the session, closing the previous one first.
    pub async fn open(
        &self,
        id: &SessionId,
    ) -> Result<(ChannelHandle, impl Stream<Item = OutboundEvent> + Send + 'static), PushError>
    {
        let entry = self.entry(id).ok_or(PushError::NoSession)?;
        let mut active = entry.active.lock().await;

        if let Some(previous) = active.take() {
            debug!(session_id = %id, generation = previous.handle.generation, "Replacing outbound channel");
            if !close_channel(previous, self.handover_grace).await {
                warn!(session_id = %id, "Previous outbound channel did not hand its queue back");
            }
        }

        let (epoch, rx) = {
            let mut slot = entry.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.rx.take() {
                Some(rx) => (slot.epoch, rx),
                None => {
                    // The old reader is stuck; it will never read again, but
                    // whatever it still buffers is lost.
                    let (tx, rx) = mpsc::channel(self.capacity);
                    *entry.tx.lock().unwrap_or_else(PoisonError::into_inner) = tx;
                    slot.epoch += 1;
                    (slot.epoch, rx)
                }
            }
        };

        let handle = ChannelHandle {
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        *active = Some(ActiveChannel {
            handle,
            shutdown: shutdown_tx,
            done: done_rx,
        });

        let guard = QueueGuard {
            slot: entry.slot.clone(),
            epoch,
            rx: Some(rx),
            done: Some(done_tx),
        };
        let event_ids = entry.event_ids.clone();
        let stream = async_stream::stream! {
            let mut guard = guard;
            let mut shutdown_rx = shutdown_rx;
            loop {
                let next = match guard.rx.as_mut() {
                    Some(rx) => tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => None,
                        message = rx.recv() => message,
                    },
                    None => None,
                };
                match next {
                    Some(message) => {
                        let id = event_ids.fetch_add(1, Ordering::Relaxed) + 1;
                        yield OutboundEvent { id, message };
                    }
                    None => break,
                }
            }
        };

        Ok((handle, stream))
    }

    /// Handle of the channel currently open for the session, if any.
    pub async fn active_channel(&self, id: &SessionId) -> Option<ChannelHandle> {
        let entry = self.entry(id)?;
        let active = entry.active.lock().await;
        active.as_ref().map(|a| a.handle)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutboundRelease for StreamRegistry {
    async fn release(&self, id: &SessionId, grace: Duration) -> bool {
        let removed = self.entries().remove(id);
        let Some(entry) = removed else {
            return true;
        };
        let previous = entry.active.lock().await.take();
        match previous {
            Some(channel) => close_channel(channel, grace).await,
            None => true,
        }
    }
}

async fn close_channel(channel: ActiveChannel, grace: Duration) -> bool {
    let _ = channel.shutdown.send(());
    tokio::time::timeout(grace, channel.done).await.is_ok()
}

/// Hands the queue back to its session when the channel ends, whether the
/// stream finished or the client went away.
struct QueueGuard {
    slot: Arc<Mutex<QueueSlot>>,
    epoch: u64,
    rx: Option<mpsc::Receiver<Value>>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.epoch == self.epoch && slot.rx.is_none() {
                slot.rx = Some(rx);
            }
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}
