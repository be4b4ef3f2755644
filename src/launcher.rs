//! Starting the server process.
//!
//! The child's environment is built from explicit layers, lowest first:
//!
//! 1. the ambient environment of this process,
//! 2. protocol defaults (the variables MCP stdio servers inherit),
//! 3. the out-of-band layer handed over by an orchestrator,
//! 4. the invocation's own overrides.
//!
//! stdin/stdout carry the protocol; stderr is relayed to ours untouched.

use crate::error::LaunchError;
use crate::invocation::Invocation;
use crate::session::McpSession;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[cfg(not(windows))]
const DEFAULT_INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const DEFAULT_INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Time the server gets to exit on its own after stdin closes.
const STDIN_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Time the server gets to exit after SIGTERM before SIGKILL.
#[cfg(unix)]
const SIGTERM_GRACE: Duration = Duration::from_secs(3);

/// Time allowed for the stderr relay to drain after the child is gone.
const RELAY_DRAIN: Duration = Duration::from_millis(500);

/// Bytes read when looking for a `#!` line.
const SHEBANG_PROBE: usize = 512;

/// Environment inputs for the child, passed in explicitly.
#[derive(Debug, Clone, Default)]
pub struct EnvLayers {
    pub ambient: HashMap<String, String>,
    pub out_of_band: IndexMap<String, String>,
}

impl EnvLayers {
    pub fn new(ambient: HashMap<String, String>) -> Self {
        Self {
            ambient,
            out_of_band: IndexMap::new(),
        }
    }

    pub fn with_out_of_band(mut self, layer: IndexMap<String, String>) -> Self {
        self.out_of_band = layer;
        self
    }

    /// The variables MCP stdio servers inherit by default. Exported shell
    /// functions (`() { ... }`) are skipped.
    pub fn protocol_defaults(&self) -> Vec<(String, String)> {
        DEFAULT_INHERITED_ENV_VARS
            .iter()
            .filter_map(|key| {
                let value = self.ambient.get(*key)?;
                (!value.starts_with("()")).then(|| ((*key).to_string(), value.clone()))
            })
            .collect()
    }

    /// Merges all layers; later layers win on collision.
    pub fn merged(&self, overrides: &IndexMap<String, String>) -> HashMap<String, String> {
        let mut env = self.ambient.clone();
        env.extend(self.protocol_defaults());
        env.extend(self.out_of_band.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// The program actually spawned and its full argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Locates `command` on `path_var` (or relative to `cwd` when it contains a
/// path separator) and follows a `#!` launcher line if the file has one.
///
/// For a script `tool` with `#!/usr/bin/env node`, this yields
/// `node <path-to-tool> <args...>`.
pub fn resolve_executable(
    command: &str,
    args: &[String],
    path_var: Option<&str>,
    cwd: &Path,
) -> Result<ResolvedCommand, LaunchError> {
    let located = which::which_in(command, path_var, cwd).map_err(|e| {
        tracing::debug!(command, error = %e, "executable lookup failed");
        match non_executable_match(command, path_var, cwd) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "candidate exists but is not executable");
                LaunchError::PermissionDenied {
                    command: command.to_string(),
                }
            }
            None => LaunchError::NotFound {
                command: command.to_string(),
            },
        }
    })?;

    let Some(line) = read_shebang(&located) else {
        return Ok(ResolvedCommand {
            program: located,
            args: args.to_vec(),
        });
    };

    let mut tokens = line.split_whitespace();
    let Some(interpreter) = tokens.next() else {
        return Ok(ResolvedCommand {
            program: located,
            args: args.to_vec(),
        });
    };

    let (program, mut leading) = if Path::new(interpreter).file_name().is_some_and(|n| n == "env") {
        // `env [-S] [-i] [VAR=val] prog args...`
        let mut rest = tokens.skip_while(|t| t.starts_with('-') || t.contains('='));
        let Some(target) = rest.next() else {
            return Err(LaunchError::NotFound {
                command: line.to_string(),
            });
        };
        let program = which::which_in(target, path_var, cwd).map_err(|_| LaunchError::NotFound {
            command: target.to_string(),
        })?;
        (program, rest.map(str::to_string).collect::<Vec<_>>())
    } else {
        // The kernel passes everything after the interpreter as one argument.
        let rest = tokens.collect::<Vec<_>>().join(" ");
        let leading = if rest.is_empty() { Vec::new() } else { vec![rest] };
        (PathBuf::from(interpreter), leading)
    };

    tracing::debug!(
        script = %located.display(),
        interpreter = %program.display(),
        "following launcher line"
    );

    leading.push(located.to_string_lossy().into_owned());
    leading.extend(args.iter().cloned());
    Ok(ResolvedCommand {
        program,
        args: leading,
    })
}

/// A file the lookup skipped because it lacks the execute permission.
fn non_executable_match(command: &str, path_var: Option<&str>, cwd: &Path) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        let path = cwd.join(candidate);
        return path.is_file().then_some(path);
    }
    std::env::split_paths(path_var?)
        .map(|dir| cwd.join(dir).join(command))
        .find(|path| path.is_file())
}

/// Returns the text after `#!` on the first line, if present.
fn read_shebang(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut buf = [0u8; SHEBANG_PROBE];
    let n = file.read(&mut buf).ok()?;
    let head = buf[..n].strip_prefix(b"#!")?;
    let end = head.iter().position(|b| *b == b'\n').unwrap_or(head.len());
    let line = String::from_utf8_lossy(&head[..end]).trim().to_string();
    (!line.is_empty()).then_some(line)
}

pub type ChildSession = McpSession<BufReader<ChildStdout>, ChildStdin>;

/// A running server: the protocol session over its stdio and the means to
/// stop it.
pub struct TransportHandle {
    child: Child,
    session: ChildSession,
    stderr_relay: JoinHandle<()>,
    program: String,
}

/// Spawns the server described by `invocation`.
///
/// Must be called from within a Tokio runtime.
pub fn launch(
    invocation: &Invocation,
    layers: &EnvLayers,
    cwd: &Path,
    request_timeout: Option<Duration>,
) -> Result<TransportHandle, LaunchError> {
    let env = layers.merged(invocation.env_overrides());
    let resolved = resolve_executable(
        invocation.server_command(),
        invocation.server_args(),
        env.get("PATH").map(String::as_str),
        cwd,
    )?;
    let program = resolved.program.display().to_string();

    tracing::info!(program = %program, args = ?resolved.args, "starting MCP server");

    let mut child = Command::new(&resolved.program)
        .args(&resolved.args)
        .env_clear()
        .envs(&env)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| match source.kind() {
            ErrorKind::NotFound => LaunchError::NotFound {
                command: program.clone(),
            },
            ErrorKind::PermissionDenied => LaunchError::PermissionDenied {
                command: program.clone(),
            },
            _ => LaunchError::Spawn {
                command: program.clone(),
                source,
            },
        })?;

    let missing = |stream: &str| LaunchError::Spawn {
        command: program.clone(),
        source: io::Error::other(format!("{stream} was not piped")),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let stderr_relay = tokio::spawn(async move {
        let mut sink = tokio::io::stderr();
        if let Err(e) = tokio::io::copy(&mut stderr, &mut sink).await {
            tracing::debug!("server stderr relay stopped: {e}");
        }
    });

    Ok(TransportHandle {
        child,
        session: McpSession::new(BufReader::new(stdout), stdin, request_timeout),
        stderr_relay,
        program,
    })
}

impl TransportHandle {
    pub fn session(&mut self) -> &mut ChildSession {
        &mut self.session
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Closes stdin, waits briefly for the server to exit, then escalates to
    /// SIGTERM and SIGKILL. Always reaps the child.
    pub async fn close(self) -> io::Result<ExitStatus> {
        let Self {
            mut child,
            session,
            mut stderr_relay,
            program,
        } = self;

        // Dropping the session closes the child's stdin.
        drop(session);

        let status = match timeout(STDIN_CLOSE_GRACE, child.wait()).await {
            Ok(status) => status,
            Err(_) => terminate(&mut child).await,
        };

        if timeout(RELAY_DRAIN, &mut stderr_relay).await.is_err() {
            tracing::debug!(program = %program, "stderr relay did not drain in time");
            stderr_relay.abort();
        }

        if let Ok(status) = &status {
            tracing::debug!(program = %program, %status, "MCP server exited");
        }
        status
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "child has no PID"))?;
    let pid = i32::try_from(pid).map_err(io::Error::other)?;

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = timeout(SIGTERM_GRACE, child.wait()).await {
        return result;
    }

    child.kill().await?;
    child.wait().await
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    child.kill().await?;
    child.wait().await
}
