//! # mcp-call
//!
//! Single-shot MCP client: start a server over stdio, call one tool, print the
//! result as JSON on stdout.
//!
//! ## Quick Start
//!
//! ```bash
//! # Server command as positional arguments
//! mcp-call --tool-name add --tool-arg a=5 --tool-arg b=10 node server.js
//!
//! # Server from a configuration profile
//! mcp-call --config mcp.json --server everything --tool-name echo --tool-arg message=hi
//!
//! # Server flags that collide with ours go after `--`
//! mcp-call --tool-name t -- python server.py --env prod
//! ```
//!
//! ## Environment Channel
//!
//! With no arguments at all, the invocation is read from `MCP_CLI_*`
//! variables instead (see the `channel` module).
//!
//! ## Output
//!
//! - stdout: the `tools/call` result, pretty-printed, on success only
//! - stderr: errors, logs (`RUST_LOG` or `--verbose`) and the server's stderr
//! - exit code: 0 on success, 1 otherwise

use anyhow::{Context, Result};
use indexmap::IndexMap;
use mcp_call::channel;
use mcp_call::cli::{parse_args, Parsed};
use mcp_call::error::CliError;
use mcp_call::executor::execute;
use mcp_call::invocation::{build, RawInvocation};
use mcp_call::launcher::{launch, EnvLayers};
use mcp_call::report::report;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything ingestion hands to the run.
struct Request {
    raw: RawInvocation,
    verbose: bool,
    request_timeout: Option<Duration>,
    out_of_band: Option<IndexMap<String, String>>,
}

enum Ingested {
    Run(Request),
    Info(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let ambient = ambient_vars();

    let outcome = match ingest(argv, &ambient) {
        Ok(Ingested::Info(text)) => {
            print!("{text}");
            return ExitCode::SUCCESS;
        }
        Ok(Ingested::Run(request)) => {
            init_tracing(request.verbose);
            run(request, ambient).await
        }
        Err(e) => Err(e.into()),
    };

    let code = report(&outcome, &mut io::stdout().lock(), &mut io::stderr().lock());
    ExitCode::from(code)
}

/// Picks the ingestion path: the environment channel only when argv is empty.
fn ingest(argv: Vec<String>, ambient: &HashMap<String, String>) -> Result<Ingested, CliError> {
    if argv.is_empty() && channel::is_present(ambient) {
        return Ok(Ingested::Run(Request {
            raw: channel::read_invocation(ambient)?,
            verbose: false,
            request_timeout: None,
            out_of_band: None,
        }));
    }

    let cli = match parse_args(argv)? {
        Parsed::Info(text) => return Ok(Ingested::Info(text)),
        Parsed::Run(cli) => cli,
    };

    Ok(Ingested::Run(Request {
        verbose: cli.verbose,
        request_timeout: cli.request_timeout.map(Duration::from_millis),
        out_of_band: channel::read_env_layer(ambient)?,
        raw: cli.into_raw(),
    }))
}

async fn run(request: Request, ambient: HashMap<String, String>) -> Result<Value> {
    let cwd = std::env::current_dir().context("Failed to determine the working directory")?;
    let invocation = build(request.raw, &cwd)?;

    tracing::debug!(
        tool = invocation.tool_name(),
        command = invocation.server_command(),
        args = ?invocation.server_args(),
        "invocation ready"
    );

    let mut layers = EnvLayers::new(ambient);
    if let Some(layer) = request.out_of_band {
        layers = layers.with_out_of_band(layer);
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_signals(cancel.clone()));

    let outcome = match launch(&invocation, &layers, &cwd, request.request_timeout) {
        Ok(transport) => execute(transport, &invocation, &cancel)
            .await
            .map_err(CliError::from),
        Err(e) => Err(CliError::from(e)),
    };
    watcher.abort();

    Ok(outcome?)
}

/// Snapshot of the process environment. Non UTF-8 entries cannot be passed
/// through the string-typed layers and are skipped.
fn ambient_vars() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Cancels `cancel` on Ctrl-C or, on Unix, SIGTERM.
async fn watch_signals(cancel: CancellationToken) {
    tokio::select! {
        () = interrupted() => tracing::debug!("received Ctrl-C"),
        () = terminated() => tracing::debug!("received SIGTERM"),
    }
    cancel.cancel();
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("failed to listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending::<()>().await;
}
