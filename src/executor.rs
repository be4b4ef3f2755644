//! The single tool call.
//!
//! `Idle → TransportOpen → SessionEstablished → RequestSent →
//! (ResultReceived | Failed) → TransportClosed`. A failure before the request
//! goes straight to `Failed`. The transport is closed on every path, and a
//! close failure never replaces the call's own outcome.

use crate::error::ExecError;
use crate::invocation::Invocation;
use crate::jsonrpc::RpcOutcome;
use crate::launcher::TransportHandle;
use crate::session::McpSession;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// MCP protocol version we request.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

const CLIENT_NAME: &str = "mcp-call";

/// Fallback message for failed tool results without text content.
const TOOL_FAILED: &str = "Tool execution failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    TransportOpen,
    SessionEstablished,
    RequestSent,
    ResultReceived,
    Failed,
    TransportClosed,
}

/// Current position in the call lifecycle, logged on every transition.
#[derive(Debug)]
pub struct CallProgress {
    state: CallState,
}

impl CallProgress {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    fn advance(&mut self, next: CallState) {
        tracing::debug!(from = ?self.state, to = ?next, "tool call state");
        self.state = next;
    }
}

impl Default for CallProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the call over `transport`, then closes it.
///
/// Cancellation is honored at every suspension point; the transport is still
/// closed before this returns.
pub async fn execute(
    mut transport: TransportHandle,
    invocation: &Invocation,
    cancel: &CancellationToken,
) -> Result<Value, ExecError> {
    let mut progress = CallProgress::new();
    progress.advance(CallState::TransportOpen);

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ExecError::Cancelled),
        result = call_tool(transport.session(), invocation, &mut progress) => result,
    };

    match &outcome {
        Ok(_) => progress.advance(CallState::ResultReceived),
        Err(ExecError::Cancelled) => {
            tracing::warn!(state = ?progress.state(), "tool call cancelled by operator");
            progress.advance(CallState::Failed);
        }
        Err(e) => {
            tracing::debug!(state = ?progress.state(), "tool call failed: {e}");
            progress.advance(CallState::Failed);
        }
    }

    let program = transport.program().to_string();
    match transport.close().await {
        Ok(status) => tracing::debug!(program = %program, %status, "transport closed"),
        Err(e) => tracing::warn!(program = %program, "failed to close MCP server transport: {e}"),
    }
    progress.advance(CallState::TransportClosed);

    outcome
}

/// Handshake plus `tools/call` over an open session.
pub async fn call_tool<R, W>(
    session: &mut McpSession<R, W>,
    invocation: &Invocation,
    progress: &mut CallProgress,
) -> Result<Value, ExecError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let init_params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": client_capabilities(),
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    });

    match session
        .request("initialize", Some(init_params))
        .await
        .map_err(ExecError::Handshake)?
    {
        RpcOutcome::Error(err) => {
            return Err(ExecError::Initialize {
                code: err.code,
                message: err.message,
            })
        }
        RpcOutcome::Result(result) => log_server_info(&result),
    }

    session
        .notify("notifications/initialized", None)
        .await
        .map_err(ExecError::Handshake)?;
    progress.advance(CallState::SessionEstablished);

    let params = json!({
        "name": invocation.tool_name(),
        "arguments": invocation.arguments(),
    });

    progress.advance(CallState::RequestSent);
    let result = match session
        .request("tools/call", Some(params))
        .await
        .map_err(ExecError::Call)?
    {
        RpcOutcome::Error(err) => {
            return Err(ExecError::Rpc {
                code: err.code,
                message: err.message,
            })
        }
        RpcOutcome::Result(result) => result,
    };

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ExecError::ToolFailed {
            message: tool_error_message(&result),
        });
    }

    Ok(result)
}

/// This client only invokes tools; it offers no sampling, roots, or
/// elicitation to the server.
fn client_capabilities() -> Value {
    json!({ "tools": {} })
}

fn log_server_info(result: &Value) {
    let info = &result["serverInfo"];
    tracing::info!(
        server = info["name"].as_str().unwrap_or("unknown"),
        version = info["version"].as_str().unwrap_or("unknown"),
        protocol = result["protocolVersion"].as_str().unwrap_or("unknown"),
        "MCP server ready"
    );
}

/// Text content of a failed tool result, verbatim.
fn tool_error_message(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        TOOL_FAILED.to_string()
    } else {
        texts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{parse_args, Parsed};
    use crate::error::ProtocolError;
    use crate::invocation::build;
    use std::path::Path;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn invocation(tokens: &[&str]) -> Invocation {
        match parse_args(tokens.iter().copied()).unwrap() {
            Parsed::Run(cli) => build(cli.into_raw(), Path::new("/")).unwrap(),
            Parsed::Info(text) => panic!("unexpected info output: {text}"),
        }
    }

    const INIT_OK: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1.0.0"}}}"#;

    /// Plays the server side: answers each request line with the next canned
    /// reply and returns every line it received.
    async fn run_call(replies: Vec<&'static str>) -> (Result<Value, ExecError>, CallState, Vec<Value>) {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        let server_task = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut received = Vec::new();
            let mut replies = replies.into_iter();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                let is_request = message.get("id").is_some();
                received.push(message);
                if is_request {
                    match replies.next() {
                        Some(reply) => {
                            server_write.write_all(reply.as_bytes()).await.unwrap();
                            server_write.write_all(b"\n").await.unwrap();
                        }
                        None => {
                            server_write.shutdown().await.unwrap();
                        }
                    }
                }
            }
            received
        });

        let inv = invocation(&["--tool-name", "calc", "--tool-arg", "a=5", "--tool-arg", "b=10", "node"]);
        let mut session = McpSession::new(BufReader::new(client_read), client_write, None);
        let mut progress = CallProgress::new();
        let outcome = call_tool(&mut session, &inv, &mut progress).await;
        drop(session);

        let received = server_task.await.unwrap();
        (outcome, progress.state(), received)
    }

    #[tokio::test]
    async fn successful_call_returns_raw_result() {
        let (outcome, state, received) = run_call(vec![
            INIT_OK,
            r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"15"}],"structuredContent":{"result":15}}}"#,
        ])
        .await;

        let result = outcome.unwrap();
        assert_eq!(result["structuredContent"]["result"], 15);
        assert_eq!(state, CallState::RequestSent);

        assert_eq!(received.len(), 3);
        assert_eq!(received[0]["method"], "initialize");
        assert_eq!(received[0]["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(received[0]["params"]["clientInfo"]["name"], "mcp-call");
        assert_eq!(received[1]["method"], "notifications/initialized");
        assert_eq!(received[2]["method"], "tools/call");
        assert_eq!(received[2]["params"], json!({"name": "calc", "arguments": {"a": 5, "b": 10}}));
    }

    #[tokio::test]
    async fn initialize_error_stops_before_request() {
        let (outcome, state, received) = run_call(vec![
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Unsupported protocol version"}}"#,
        ])
        .await;

        match outcome.unwrap_err() {
            ExecError::Initialize { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Unsupported protocol version");
            }
            other => panic!("Expected Initialize, got: {other:?}"),
        }
        assert_eq!(state, CallState::Idle);
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn server_closing_during_handshake_is_handshake_error() {
        let (outcome, _, _) = run_call(vec![]).await;
        assert!(matches!(
            outcome.unwrap_err(),
            ExecError::Handshake(ProtocolError::ServerClosed { .. })
        ));
    }

    #[tokio::test]
    async fn server_closing_mid_call_is_call_error() {
        let (outcome, state, _) = run_call(vec![INIT_OK]).await;
        assert!(matches!(
            outcome.unwrap_err(),
            ExecError::Call(ProtocolError::ServerClosed { .. })
        ));
        assert_eq!(state, CallState::RequestSent);
    }

    #[tokio::test]
    async fn rpc_error_is_preserved_verbatim() {
        let (outcome, _, _) = run_call(vec![
            INIT_OK,
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"Unknown tool: calc"}}"#,
        ])
        .await;

        let err = outcome.unwrap_err();
        assert_eq!(
            err.to_string(),
            "server rejected the tool call (code -32602): Unknown tool: calc"
        );
    }

    #[tokio::test]
    async fn is_error_result_is_tool_failure() {
        let (outcome, _, _) = run_call(vec![
            INIT_OK,
            r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"division by zero"},{"type":"text","text":"at line 3"}],"isError":true}}"#,
        ])
        .await;

        match outcome.unwrap_err() {
            ExecError::ToolFailed { message } => assert_eq!(message, "division by zero\nat line 3"),
            other => panic!("Expected ToolFailed, got: {other:?}"),
        }
    }

    #[test]
    fn tool_error_without_text_uses_fallback() {
        let result = json!({"content": [{"type": "image", "data": "x", "mimeType": "image/png"}], "isError": true});
        assert_eq!(tool_error_message(&result), TOOL_FAILED);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::launcher::{launch, EnvLayers};
        use std::collections::HashMap;
        use std::time::{Duration, Instant};

        const FAKE_SERVER: &str = r#"
read -r _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1.0.0"}}}'
read -r _initialized
read -r _call
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"15"}],"isError":false}}'
"#;

        const HANGING_SERVER: &str = r#"
read -r _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{},"serverInfo":{"name":"slow","version":"0"}}}'
exec sleep 30
"#;

        fn layers() -> EnvLayers {
            let mut ambient = HashMap::new();
            ambient.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
            EnvLayers::new(ambient)
        }

        #[tokio::test]
        async fn execute_against_script_server() {
            let inv = invocation(&["--tool-name", "calc", "sh", "-c", FAKE_SERVER]);
            let transport = launch(&inv, &layers(), Path::new("/"), None).unwrap();

            let result = execute(transport, &inv, &CancellationToken::new()).await.unwrap();
            assert_eq!(result["content"][0]["text"], "15");
        }

        #[tokio::test]
        async fn cancellation_closes_transport() {
            let inv = invocation(&["--tool-name", "calc", "sh", "-c", HANGING_SERVER]);
            let transport = launch(&inv, &layers(), Path::new("/"), None).unwrap();

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                trigger.cancel();
            });

            let started = Instant::now();
            let err = execute(transport, &inv, &cancel).await.unwrap_err();
            assert!(matches!(err, ExecError::Cancelled));
            // Returned only after the sleeping server was terminated.
            assert!(started.elapsed() < Duration::from_secs(20));
        }

        #[tokio::test]
        async fn request_timeout_is_call_error() {
            let inv = invocation(&["--tool-name", "calc", "sh", "-c", HANGING_SERVER]);
            let transport = launch(&inv, &layers(), Path::new("/"), Some(Duration::from_millis(1000))).unwrap();

            let err = execute(transport, &inv, &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, ExecError::Call(ProtocolError::Timeout { .. })));
        }
    }
}
