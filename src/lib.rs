//! # mcp-call
//!
//! Launch a stdio MCP (Model Context Protocol) server, make exactly one
//! `tools/call`, print the JSON result and exit.
//!
//! The run is a straight pipeline:
//!
//! 1. [`cli`] or [`channel`] ingest a [`RawInvocation`](invocation::RawInvocation)
//! 2. [`invocation::build`] validates it and applies a [`config`] profile
//! 3. [`launcher::launch`] spawns the server with explicit [`EnvLayers`](launcher::EnvLayers)
//! 4. [`executor::execute`] runs the handshake and the call over a [`session`]
//! 5. [`report::report`] prints the outcome and picks the exit code
//!
//! Nothing below the binary's `main` exits the process.

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod jsonrpc;
pub mod kv;
pub mod launcher;
pub mod report;
pub mod session;

pub use error::{CliError, ConfigError, ExecError, LaunchError, ProtocolError, UsageError};
pub use invocation::{build, Invocation, RawInvocation};
