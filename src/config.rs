//! Server profiles loaded from a JSON configuration document.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "everything": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-everything"],
//!       "env": {"DEBUG": "1"}
//!     }
//!   }
//! }
//! ```

use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One named server connection.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerProfile {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Transport kind. Absent means stdio.
    #[serde(default, rename = "type")]
    pub transport: Option<String>,
}

/// Profiles are kept as raw JSON text until one is selected, so a broken
/// sibling entry does not prevent using a valid one, and the selected entry is
/// read with its own key order.
#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: Option<IndexMap<String, Box<RawValue>>>,
}

/// Loads `profile_name` from the configuration document at `path`.
///
/// A relative `path` is resolved against `cwd`.
pub fn resolve_profile(path: &Path, profile_name: &str, cwd: &Path) -> Result<ServerProfile, ConfigError> {
    let config_path = absolutize(path, cwd);

    let content = match fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::NotFound { path: config_path });
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: config_path,
                source,
            })
        }
    };

    let document: ConfigDocument =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?;

    let mut servers = document.mcp_servers.unwrap_or_default();
    let Some(raw) = servers.shift_remove(profile_name) else {
        return Err(ConfigError::ProfileNotFound {
            name: profile_name.to_string(),
            available: servers.into_keys().collect(),
        });
    };

    let profile: ServerProfile =
        serde_json::from_str(raw.get()).map_err(|source| ConfigError::InvalidProfile {
            name: profile_name.to_string(),
            source,
        })?;

    if let Some(kind) = profile.transport.as_deref() {
        if kind != "stdio" {
            return Err(ConfigError::UnsupportedTransport {
                name: profile_name.to_string(),
                kind: kind.to_string(),
            });
        }
    }

    tracing::debug!(
        config = %config_path.display(),
        server = profile_name,
        command = %profile.command,
        "resolved server profile"
    );
    Ok(profile)
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
