//! Command-line ingestion.
//!
//! Server commands routinely carry their own flags (`npx -y pkg --port 3`), so
//! the token list is partitioned before clap sees it:
//!
//! - the first literal `--` ends the front segment; everything after it is
//!   passed through verbatim;
//! - in the front segment, our own flags are picked out and every other token
//!   becomes positional, in order.
//!
//! The recognized flags are then re-emitted in `--flag=value` form followed by
//! `--` and the positional tokens, and parsed with clap.

use crate::error::UsageError;
use crate::invocation::RawInvocation;
use crate::kv::{parse_key_value, parse_tool_arg};
use clap::error::ErrorKind;
use clap::Parser;
use indexmap::IndexMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mcp-call")]
#[command(about = "Launch an MCP server over stdio, call one tool, print the result as JSON")]
#[command(version)]
#[command(args_override_self = true)]
#[command(override_usage = "mcp-call [OPTIONS] --tool-name <NAME> [SERVER_COMMAND [SERVER_ARGS...]] [-- PASSTHROUGH...]")]
pub struct Cli {
    /// Environment variable for the server process (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Tool argument; the value is sent as JSON when it parses as JSON (repeatable)
    #[arg(long = "tool-arg", value_name = "KEY=VALUE")]
    pub tool_arg: Vec<String>,

    /// Name of the tool to call
    #[arg(long, value_name = "NAME")]
    pub tool_name: Option<String>,

    /// JSON configuration file with an `mcpServers` map (requires --server)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Profile name inside the configuration file (requires --config)
    #[arg(long, value_name = "NAME")]
    pub server: Option<String>,

    /// Per-request timeout in milliseconds (default: wait indefinitely)
    #[arg(long, value_name = "MS")]
    pub request_timeout: Option<u64>,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Server command followed by its arguments
    #[arg(last = true, value_name = "SERVER_COMMAND")]
    pub positional: Vec<String>,
}

/// What argv asked for.
#[derive(Debug)]
pub enum Parsed {
    Run(Box<Cli>),
    /// `--help` or `--version`: print and exit successfully.
    Info(String),
}

/// Flags that consume a value: (short, long).
const VALUE_FLAGS: &[(Option<&str>, &str)] = &[
    (Some("-e"), "--env"),
    (None, "--tool-arg"),
    (None, "--tool-name"),
    (None, "--config"),
    (None, "--server"),
    (None, "--request-timeout"),
];

const SWITCHES: &[&str] = &["-v", "--verbose", "-h", "--help", "-V", "--version"];

/// Parses the tokens after the program name.
pub fn parse_args<I, S>(tokens: I) -> Result<Parsed, UsageError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
    let normalized = normalize(&tokens);

    match Cli::try_parse_from(normalized) {
        Ok(cli) => Ok(Parsed::Run(Box::new(cli))),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Ok(Parsed::Info(e.to_string())),
            _ => {
                let rendered = e.to_string();
                let message = rendered.trim_end();
                Err(UsageError::Clap(message.strip_prefix("error: ").unwrap_or(message).to_string()))
            }
        },
    }
}

/// Rewrites raw tokens into `mcp-call <flags> -- <positional>`.
fn normalize(tokens: &[String]) -> Vec<String> {
    let (front, passthrough) = match tokens.iter().position(|t| t == "--") {
        Some(idx) => (&tokens[..idx], &tokens[idx + 1..]),
        None => (tokens, &[][..]),
    };

    let mut flags = vec!["mcp-call".to_string()];
    let mut positional = Vec::new();

    let mut iter = front.iter();
    while let Some(token) = iter.next() {
        if SWITCHES.contains(&token.as_str()) {
            flags.push(token.clone());
            continue;
        }

        if let Some(long) = value_flag_long(token) {
            match iter.next() {
                Some(value) => flags.push(format!("{long}={value}")),
                // Let clap report the missing value.
                None => flags.push(long.to_string()),
            }
            continue;
        }

        if let Some((name, _)) = token.split_once('=') {
            if VALUE_FLAGS.iter().any(|(_, long)| *long == name) {
                flags.push(token.clone());
                continue;
            }
        }

        positional.push(token.clone());
    }

    positional.extend(passthrough.iter().cloned());

    flags.push("--".to_string());
    flags.extend(positional);
    flags
}

fn value_flag_long(token: &str) -> Option<&'static str> {
    VALUE_FLAGS
        .iter()
        .find(|(short, long)| *long == token || *short == Some(token))
        .map(|(_, long)| *long)
}

impl Cli {
    /// Folds the repeatable flags and hands everything to the builder.
    pub fn into_raw(self) -> RawInvocation {
        let env = self.env.iter().fold(IndexMap::new(), |acc, pair| parse_key_value(pair, acc));
        let tool_args = self.tool_arg.iter().fold(IndexMap::new(), |acc, pair| parse_tool_arg(pair, acc));

        RawInvocation {
            tool_name: self.tool_name,
            tool_args,
            has_tool_args: !self.tool_arg.is_empty(),
            env,
            config: self.config,
            server: self.server,
            positional: self.positional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(tokens: &[&str]) -> Cli {
        match parse_args(tokens.iter().copied()) {
            Ok(Parsed::Run(cli)) => *cli,
            other => panic!("Expected Run, got: {other:?}"),
        }
    }

    #[test]
    fn flags_before_server_command() {
        let cli = run(&[
            "--tool-name", "calc", "--tool-arg", "a=5", "--tool-arg", "b=10", "node", "server.js",
        ]);
        assert_eq!(cli.tool_name.as_deref(), Some("calc"));
        assert_eq!(cli.tool_arg, ["a=5", "b=10"]);
        assert_eq!(cli.positional, ["node", "server.js"]);
    }

    #[test]
    fn recognized_flags_anywhere_in_front_segment() {
        let cli = run(&["node", "--tool-name", "calc", "server.js", "-e", "A=1"]);
        assert_eq!(cli.tool_name.as_deref(), Some("calc"));
        assert_eq!(cli.env, ["A=1"]);
        assert_eq!(cli.positional, ["node", "server.js"]);
    }

    #[test]
    fn unrecognized_flags_become_positional() {
        let cli = run(&["--tool-name", "t", "npx", "-y", "@scope/server", "--port", "3"]);
        assert_eq!(cli.positional, ["npx", "-y", "@scope/server", "--port", "3"]);
    }

    #[test]
    fn tokens_after_separator_are_never_flags() {
        let cli = run(&["--tool-name", "t", "python", "--", "--tool-name", "x", "-e", "B=2"]);
        assert_eq!(cli.tool_name.as_deref(), Some("t"));
        assert!(cli.env.is_empty());
        assert_eq!(cli.positional, ["python", "--tool-name", "x", "-e", "B=2"]);
    }

    #[test]
    fn only_first_separator_splits() {
        let cli = run(&["--tool-name", "t", "--", "sh", "--", "-c"]);
        assert_eq!(cli.positional, ["sh", "--", "-c"]);
    }

    #[test]
    fn equals_form_and_hyphen_values() {
        let cli = run(&["--tool-name=calc", "--tool-arg", "--x=1", "--env=A=1", "srv"]);
        assert_eq!(cli.tool_name.as_deref(), Some("calc"));
        assert_eq!(cli.tool_arg, ["--x=1"]);
        assert_eq!(cli.env, ["A=1"]);
        assert_eq!(cli.positional, ["srv"]);
    }

    #[test]
    fn last_single_value_flag_wins() {
        let cli = run(&["--tool-name", "first", "--tool-name", "second", "srv"]);
        assert_eq!(cli.tool_name.as_deref(), Some("second"));
    }

    #[test]
    fn config_and_server_flags() {
        let cli = run(&["--config", "cfg.json", "--server", "dev", "--tool-name", "t"]);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.json")));
        assert_eq!(cli.server.as_deref(), Some("dev"));
        assert!(cli.positional.is_empty());
    }

    #[test]
    fn missing_flag_value_is_usage_error() {
        let err = parse_args(["srv", "--tool-name"]).unwrap_err();
        assert!(matches!(err, UsageError::Clap(_)));
    }

    #[test]
    fn invalid_timeout_is_usage_error() {
        let err = parse_args(["--request-timeout", "soon", "srv"]).unwrap_err();
        assert!(err.to_string().contains("--request-timeout"));
    }

    #[test]
    fn help_is_informational() {
        match parse_args(["--help"]) {
            Ok(Parsed::Info(text)) => assert!(text.contains("--tool-name")),
            other => panic!("Expected Info, got: {other:?}"),
        }
    }

    #[test]
    fn into_raw_folds_pairs() {
        let raw = run(&[
            "--tool-name", "calc", "--tool-arg", "a=5", "--tool-arg", "bad", "-e", "K=v", "-e", "=x", "node",
        ])
        .into_raw();

        assert_eq!(raw.tool_args.len(), 1);
        assert_eq!(raw.tool_args["a"], json!(5));
        assert!(raw.has_tool_args);
        assert_eq!(raw.env.len(), 1);
        assert_eq!(raw.env["K"], "v");
    }
}
