//! Newline-delimited JSON-RPC session over any async byte stream pair.
//!
//! The session only frames messages and matches responses to requests; the
//! MCP method sequence lives in [`crate::executor`].

use crate::error::ProtocolError;
use crate::jsonrpc::{
    IncomingMessage, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, RpcOutcome, METHOD_NOT_FOUND,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub struct McpSession<R, W> {
    reader: R,
    line: Vec<u8>,
    writer: W,
    next_id: u64,
    timeout: Option<Duration>,
}

impl<R, W> McpSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `timeout` bounds each request; `None` waits indefinitely.
    pub fn new(reader: R, writer: W, timeout: Option<Duration>) -> Self {
        Self {
            reader,
            line: Vec::new(),
            writer,
            next_id: 1,
            timeout,
        }
    }

    /// Sends a request and waits for the response with the same id.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<RpcOutcome, ProtocolError> {
        let id = self.next_id;
        self.next_id += 1;

        self.write_message(&JsonRpcRequest::new(id, method, params)).await?;
        tracing::debug!(id, method, "request sent");

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.await_response(id, method))
                .await
                .map_err(|_| ProtocolError::Timeout {
                    method: method.to_string(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })?,
            None => self.await_response(id, method).await,
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        self.write_message(&JsonRpcNotification::new(method, params)).await
    }

    async fn await_response(&mut self, id: u64, method: &str) -> Result<RpcOutcome, ProtocolError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Err(ProtocolError::ServerClosed {
                    method: method.to_string(),
                });
            }
            let Ok(text) = std::str::from_utf8(&self.line) else {
                tracing::warn!(
                    "Skipping non UTF-8 output from server: {}",
                    String::from_utf8_lossy(&self.line).trim_end()
                );
                continue;
            };
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            let message: IncomingMessage = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Skipping non JSON-RPC output from server: {e}: {line}");
                    continue;
                }
            };

            match (message.id, message.method) {
                (Some(request_id), Some(server_method)) => {
                    self.answer_server_request(request_id, &server_method).await?;
                }
                (None, Some(notification)) => {
                    tracing::debug!(method = %notification, params = ?message.params, "server notification");
                }
                (Some(response_id), None) if response_id.as_u64() == Some(id) => {
                    return match (message.error, message.result) {
                        (Some(error), _) => Ok(RpcOutcome::Error(error)),
                        (None, Some(result)) => Ok(RpcOutcome::Result(result)),
                        (None, None) => Err(ProtocolError::Malformed {
                            method: method.to_string(),
                            reason: "response has neither result nor error".to_string(),
                        }),
                    };
                }
                (Some(other), None) => {
                    tracing::debug!(expected = id, got = %other, "ignoring response with unexpected id");
                }
                (None, None) => {
                    tracing::warn!("ignoring message with neither id nor method: {line}");
                }
            }
        }
    }

    /// Only `ping` is answered; this client declares no other server-facing
    /// capability.
    async fn answer_server_request(&mut self, id: Value, method: &str) -> Result<(), ProtocolError> {
        let reply = if method == "ping" {
            JsonRpcReply::result(id, json!({}))
        } else {
            tracing::debug!(method, "rejecting unsupported server request");
            JsonRpcReply::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
        };
        self.write_message(&reply).await
    }

    async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
