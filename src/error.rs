//! Error taxonomy for every stage of a single tool call.
//!
//! Each stage owns its own error enum so the stages stay independently
//! testable. [`CliError`] gathers them for the top-level dispatcher, which is
//! the only place that turns an error into a process exit.
//!
//! Display strings never repeat their source; the reporter prints the whole
//! chain.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with how the program was invoked. Detected before any process is
/// spawned.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("--tool-name is required")]
    MissingToolName,

    #[error("server command is required (pass it as a positional argument or use --config with --server)")]
    MissingServerCommand,

    #[error("--config requires --server to select a profile")]
    ConfigWithoutServer,

    #[error("--server requires --config to locate the configuration file")]
    ServerWithoutConfig,

    #[error("--tool-arg was given without --tool-name")]
    ToolArgsWithoutToolName,

    #[error("invalid value in {var}: {reason}")]
    InvalidChannelValue { var: String, reason: String },

    #[error("{0}")]
    Clap(String),
}

/// Failures while resolving a server profile from a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read config {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in config {}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Server '{name}' not found in config. Available servers: {available:?}")]
    ProfileNotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("Server '{name}' has an invalid profile")]
    InvalidProfile {
        name: String,
        source: serde_json::Error,
    },

    #[error("Server '{name}' uses transport '{kind}', only stdio servers can be launched")]
    UnsupportedTransport { name: String, kind: String },
}

/// Failures while starting the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Server command not found: {command}")]
    NotFound { command: String },

    #[error("Permission denied launching server '{command}'")]
    PermissionDenied { command: String },

    #[error("Failed to spawn MCP server '{command}'")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

/// Failures of the JSON-RPC exchange with a running server.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("server closed its output before answering '{method}'")]
    ServerClosed { method: String },

    #[error("malformed response to '{method}': {reason}")]
    Malformed { method: String, reason: String },

    #[error("'{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}

/// Outcome failures of the single tool call.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("server started but the MCP handshake failed")]
    Handshake(#[source] ProtocolError),

    #[error("server rejected initialize (code {code}): {message}")]
    Initialize { code: i64, message: String },

    #[error("tool call failed mid-request")]
    Call(#[source] ProtocolError),

    #[error("server rejected the tool call (code {code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Tool Error: {message}")]
    ToolFailed { message: String },

    #[error("cancelled by operator")]
    Cancelled,
}

/// Any error the pipeline can end with.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl CliError {
    /// True when the run ended because the operator interrupted it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Exec(ExecError::Cancelled))
    }
}
