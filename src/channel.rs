//! Environment-variable ingestion.
//!
//! An orchestrator that has already resolved an invocation can hand it to
//! `mcp-call` through the environment instead of argv, avoiding a second round
//! of quoting across the process boundary. Either a single structured payload:
//!
//! - `MCP_CLI_INVOCATION`: `{"toolName", "toolArgs", "command", "args", "env"}`
//!
//! or the individual variables:
//!
//! - `MCP_CLI_TOOL_NAME`
//! - `MCP_CLI_TOOL_ARGS`: JSON object
//! - `MCP_CLI_COMMAND`
//! - `MCP_CLI_COMMAND_ARGS`: shell-quoted, space-joined
//! - `MCP_CLI_ENV`: JSON object of string values

use crate::error::UsageError;
use crate::invocation::RawInvocation;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const INVOCATION_VAR: &str = "MCP_CLI_INVOCATION";
pub const TOOL_NAME_VAR: &str = "MCP_CLI_TOOL_NAME";
pub const TOOL_ARGS_VAR: &str = "MCP_CLI_TOOL_ARGS";
pub const COMMAND_VAR: &str = "MCP_CLI_COMMAND";
pub const COMMAND_ARGS_VAR: &str = "MCP_CLI_COMMAND_ARGS";
pub const ENV_VAR: &str = "MCP_CLI_ENV";

const CHANNEL_VARS: &[&str] = &[
    INVOCATION_VAR,
    TOOL_NAME_VAR,
    TOOL_ARGS_VAR,
    COMMAND_VAR,
    COMMAND_ARGS_VAR,
    ENV_VAR,
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationPayload {
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_args: IndexMap<String, Value>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: IndexMap<String, String>,
}

/// True when any channel variable carries an invocation. `MCP_CLI_ENV` alone
/// does not count; it only layers extra environment onto an argv invocation.
pub fn is_present(vars: &HashMap<String, String>) -> bool {
    CHANNEL_VARS
        .iter()
        .filter(|name| **name != ENV_VAR)
        .any(|name| vars.contains_key(*name))
}

/// Reads an invocation from the channel variables in `vars`.
pub fn read_invocation(vars: &HashMap<String, String>) -> Result<RawInvocation, UsageError> {
    if let Some(payload) = vars.get(INVOCATION_VAR) {
        return from_payload(payload);
    }

    let tool_args: IndexMap<String, Value> = match vars.get(TOOL_ARGS_VAR) {
        Some(raw) => parse_json_object(TOOL_ARGS_VAR, raw)?,
        None => IndexMap::new(),
    };
    let env = read_env_layer(vars)?.unwrap_or_default();

    let mut positional = Vec::new();
    if let Some(command) = vars.get(COMMAND_VAR).filter(|c| !c.is_empty()) {
        positional.push(command.clone());
    }
    if let Some(raw) = vars.get(COMMAND_ARGS_VAR) {
        let args = shlex::split(raw).ok_or_else(|| UsageError::InvalidChannelValue {
            var: COMMAND_ARGS_VAR.to_string(),
            reason: "unbalanced quoting".to_string(),
        })?;
        positional.extend(args);
    }

    Ok(RawInvocation {
        tool_name: vars.get(TOOL_NAME_VAR).cloned(),
        has_tool_args: !tool_args.is_empty(),
        tool_args,
        env,
        config: None,
        server: None,
        positional,
    })
}

/// Parses `MCP_CLI_ENV` if it is set.
pub fn read_env_layer(vars: &HashMap<String, String>) -> Result<Option<IndexMap<String, String>>, UsageError> {
    vars.get(ENV_VAR)
        .map(|raw| parse_json_object(ENV_VAR, raw))
        .transpose()
}

fn from_payload(raw: &str) -> Result<RawInvocation, UsageError> {
    let payload: InvocationPayload =
        serde_json::from_str(raw).map_err(|e| invalid(INVOCATION_VAR, e))?;

    let mut positional = Vec::with_capacity(payload.args.len() + 1);
    positional.extend(payload.command.filter(|c| !c.is_empty()));
    positional.extend(payload.args);

    Ok(RawInvocation {
        tool_name: payload.tool_name,
        has_tool_args: !payload.tool_args.is_empty(),
        tool_args: payload.tool_args,
        env: payload.env,
        config: None,
        server: None,
        positional,
    })
}

fn parse_json_object<V>(var: &str, raw: &str) -> Result<IndexMap<String, V>, UsageError>
where
    V: for<'de> Deserialize<'de>,
{
    serde_json::from_str(raw).map_err(|e| invalid(var, e))
}

fn invalid(var: &str, e: serde_json::Error) -> UsageError {
    UsageError::InvalidChannelValue {
        var: var.to_string(),
        reason: e.to_string(),
    }
}
