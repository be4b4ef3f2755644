//! The invocation descriptor and the one path that builds it.
//!
//! Both argv and the environment channel produce a [`RawInvocation`]; [`build`]
//! validates it, applies the server profile when one is selected, and returns
//! an immutable [`Invocation`].

use crate::config::resolve_profile;
use crate::error::CliError;
use crate::error::UsageError;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Unvalidated input from either ingestion path.
#[derive(Debug, Default, Clone)]
pub struct RawInvocation {
    pub tool_name: Option<String>,
    pub tool_args: IndexMap<String, Value>,
    /// Set when tool-argument flags were given, even if every pair was
    /// malformed and dropped.
    pub has_tool_args: bool,
    pub env: IndexMap<String, String>,
    pub config: Option<PathBuf>,
    pub server: Option<String>,
    pub positional: Vec<String>,
}

/// What to launch and which single tool to call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    server_command: String,
    server_args: Vec<String>,
    env_overrides: IndexMap<String, String>,
    tool_name: String,
    tool_args: IndexMap<String, Value>,
}

impl Invocation {
    pub fn server_command(&self) -> &str {
        &self.server_command
    }

    pub fn server_args(&self) -> &[String] {
        &self.server_args
    }

    pub fn env_overrides(&self) -> &IndexMap<String, String> {
        &self.env_overrides
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_args(&self) -> &IndexMap<String, Value> {
        &self.tool_args
    }

    /// The `arguments` object sent with `tools/call`.
    pub fn arguments(&self) -> Value {
        Value::Object(self.tool_args.clone().into_iter().collect())
    }
}

/// Validates `raw` and resolves the server connection parameters.
///
/// With `config` and `server` both set, the selected profile replaces any
/// positional tokens and env flags. Without them, the first positional token
/// is the server command.
pub fn build(raw: RawInvocation, cwd: &Path) -> Result<Invocation, CliError> {
    let (config, server) = match (raw.config, raw.server) {
        (Some(_), None) => return Err(UsageError::ConfigWithoutServer.into()),
        (None, Some(_)) => return Err(UsageError::ServerWithoutConfig.into()),
        (config, server) => (config, server),
    };

    let tool_name = raw.tool_name.unwrap_or_default();
    if raw.has_tool_args && tool_name.is_empty() {
        return Err(UsageError::ToolArgsWithoutToolName.into());
    }
    if tool_name.is_empty() {
        return Err(UsageError::MissingToolName.into());
    }

    let (server_command, server_args, env_overrides) = match (config, server) {
        (Some(path), Some(name)) => {
            let profile = resolve_profile(&path, &name, cwd)?;
            if !raw.positional.is_empty() || !raw.env.is_empty() {
                tracing::debug!(
                    ignored_positional = ?raw.positional,
                    ignored_env = ?raw.env.keys().collect::<Vec<_>>(),
                    "server profile replaces command-line server parameters"
                );
            }
            (profile.command, profile.args, profile.env)
        }
        _ => {
            let mut positional = raw.positional.into_iter();
            let command = positional.next().unwrap_or_default();
            (command, positional.collect(), raw.env)
        }
    };

    if server_command.is_empty() {
        return Err(UsageError::MissingServerCommand.into());
    }

    Ok(Invocation {
        server_command,
        server_args,
        env_overrides,
        tool_name,
        tool_args: raw.tool_args,
    })
}
