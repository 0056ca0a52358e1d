//! Protocol engine seam
//!
//! The transport layer is agnostic to message content: it resolves a session,
//! hands the message to a [`ProtocolEngine`] and writes back whatever the
//! engine returns. Server-initiated messages go through the session's
//! [`Outbound`] handle.

use std::sync::Weak;

use anyhow::Result;
use async_trait::async_trait;
use jsonrpsee::RpcModule;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::PushError;
use crate::http::streams::StreamRegistry;
use crate::session::SessionId;

/// Handles protocol messages for one session at a time
#[async_trait]
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Handle a JSON-RPC message (or batch).
    ///
    /// Return `Ok(None)` when nothing needs to be written back, e.g. for
    /// notifications.
    async fn handle(&self, ctx: SessionContext, message: Value) -> Result<Option<Value>>;
}

/// Session a message belongs to, plus its server-to-client push handle
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub outbound: Outbound,
}

/// Push handle for server-initiated messages
///
/// Pushes never block; a full queue is reported instead.
#[derive(Clone)]
pub struct Outbound {
    target: Target,
}

#[derive(Clone)]
enum Target {
    Queue(mpsc::Sender<Value>),
    Streams {
        session_id: SessionId,
        registry: Weak<StreamRegistry>,
    },
}

impl Outbound {
    pub(crate) fn queue(tx: mpsc::Sender<Value>) -> Self {
        Self {
            target: Target::Queue(tx),
        }
    }

    pub(crate) fn streams(session_id: SessionId, registry: Weak<StreamRegistry>) -> Self {
        Self {
            target: Target::Streams {
                session_id,
                registry,
            },
        }
    }

    pub fn push(&self, message: Value) -> Result<(), PushError> {
        match &self.target {
            Target::Queue(tx) => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PushError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => PushError::Closed,
            }),
            Target::Streams {
                session_id,
                registry,
            } => registry
                .upgrade()
                .ok_or(PushError::Closed)?
                .push(session_id, message),
        }
    }
}

/// Returns `true` for a JSON-RPC `initialize` request
pub fn is_initialize_request(message: &Value) -> bool {
    message.get("method").and_then(Value::as_str) == Some("initialize")
        && message.get("id").is_some()
}

/// [`ProtocolEngine`] backed by a jsonrpsee method table
///
/// Subscription notifications produced by a call are forwarded to the
/// session's outbound handle as they arrive.
pub struct RpcModuleEngine {
    module: RpcModule<()>,
    subscription_buffer_size: usize,
}

impl RpcModuleEngine {
    pub fn new(module: RpcModule<()>) -> Self {
        Self {
            module,
            subscription_buffer_size: 1024,
        }
    }

    pub fn with_subscription_buffer(mut self, size: usize) -> Self {
        self.subscription_buffer_size = size;
        self
    }

    async fn call(&self, ctx: &SessionContext, message: Value) -> Result<Option<Value>> {
        if message.get("id").is_none() {
            tracing::debug!(session_id = %ctx.session_id, "Accepted notification");
            return Ok(None);
        }

        let request = serde_json::to_string(&message)?;
        let (response, mut notifications) = self
            .module
            .raw_json_request(&request, self.subscription_buffer_size)
            .await
            .map_err(|e| anyhow::anyhow!("RPC error: {}", e))?;
        let response: Value = serde_json::from_str(response.get())?;

        // The receiver closes immediately for non-subscription calls.
        let outbound = ctx.outbound.clone();
        let session_id = ctx.session_id.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let message = match serde_json::from_str::<Value>(notification.get()) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, "Dropping malformed notification: {}", e);
                        continue;
                    }
                };
                if let Err(e) = outbound.push(message) {
                    tracing::debug!(session_id = %session_id, "Stopped forwarding notifications: {}", e);
                    break;
                }
            }
        });

        Ok(Some(response))
    }
}

#[async_trait]
impl ProtocolEngine for RpcModuleEngine {
    async fn handle(&self, ctx: SessionContext, message: Value) -> Result<Option<Value>> {
        match message {
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = self.call(&ctx, item).await? {
                        responses.push(response);
                    }
                }
                Ok((!responses.is_empty()).then_some(Value::Array(responses)))
            }
            single => self.call(&ctx, single).await,
        }
    }
}
