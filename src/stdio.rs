//! Stdio transport - Line-delimited JSON-RPC over stdin/stdout
//!
//! One implicit session bound to the process. Responses and server-initiated
//! messages share a single writer task, so output lines never interleave.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::StdioConfig;
use crate::engine::{Outbound, ProtocolEngine, SessionContext};
use crate::session::SessionId;

pub struct StdioTransport {
    config: StdioConfig,
    engine: Arc<dyn ProtocolEngine>,
    session_id: SessionId,
}

impl StdioTransport {
    pub fn new(config: StdioConfig, engine: Arc<dyn ProtocolEngine>) -> Self {
        Self {
            config,
            engine,
            session_id: SessionId::generate(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Serve over the process's stdin/stdout until stdin is closed.
    pub async fn serve(&self) -> Result<()> {
        info!(session_id = %self.session_id, "Starting stdio transport");
        self.serve_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve over arbitrary byte streams until `reader` reaches EOF.
    pub async fn serve_io<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(write_lines(writer, rx, close_rx));

        let ctx = SessionContext {
            session_id: self.session_id.clone(),
            outbound: Outbound::queue(tx.clone()),
        };

        let mut lines = BufReader::new(reader).lines();
        let read_result: Result<()> = async {
            while let Some(line) = lines.next_line().await? {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                debug!(session_id = %self.session_id, "Received message: {}", trimmed);

                let Some(reply) = self.dispatch(&ctx, trimmed).await else {
                    continue;
                };
                if tx.send(reply).await.is_err() {
                    warn!("Stdout writer stopped, no longer reading stdin");
                    break;
                }
            }
            Ok(())
        }
        .await;

        drop(ctx);
        drop(tx);
        // Subscription forwarders may still hold senders; the close signal
        // makes the writer flush what is queued and exit.
        let _ = close_tx.send(());
        let write_result = match writer.await {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::anyhow!("stdout writer task failed: {}", e)),
        };

        info!(session_id = %self.session_id, "Stdio transport finished");
        read_result.and(write_result)
    }

    async fn dispatch(&self, ctx: &SessionContext, line: &str) -> Option<Value> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                debug!("Failed to parse message: {}", e);
                return Some(error_line(Value::Null, -32700, "Parse error"));
            }
        };
        let id = message.get("id").cloned().unwrap_or(Value::Null);

        match self.engine.handle(ctx.clone(), message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(session_id = %self.session_id, "Protocol engine failed: {:#}", e);
                Some(error_line(id, -32603, "Internal error"))
            }
        }
    }
}

fn error_line(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    })
}

async fn write_lines<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Value>,
    mut close: oneshot::Receiver<()>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = &mut close => {
                while let Ok(message) = rx.try_recv() {
                    write_line(&mut writer, &message).await?;
                }
                break;
            }
        };
        write_line(&mut writer, &message).await?;
    }
    writer.flush().await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
