//! Console configuration.
//!
//! Resolved once at startup: CLI flags > environment > `config.toml` in the
//! data dir > built-in defaults. A missing file is not an error.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use saltdock_protocol::{DEFAULT_COMMAND, DEFAULT_TARGET, REMOTE_COMMANDS_PATH, SUBPROTOCOL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_url: String,
    pub path: String,
    pub subprotocol: String,
    /// Sent as the `Cookie` header on the channel and probe requests.
    pub cookie: Option<String>,
    /// Client-side bound on waiting for a request to settle.
    pub settle_timeout_secs: u64,
    pub default_target: String,
    pub default_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "wss://localhost".to_string(),
            path: REMOTE_COMMANDS_PATH.to_string(),
            subprotocol: SUBPROTOCOL.to_string(),
            cookie: None,
            settle_timeout_secs: 120,
            default_target: DEFAULT_TARGET.to_string(),
            default_command: DEFAULT_COMMAND.to_string(),
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            server_url: self.server_url.clone(),
            path: self.path.clone(),
            subprotocol: self.subprotocol.clone(),
            cookie: self.cookie.clone(),
        }
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }
}

/// Data directory: `explicit` > `SALTDOCK_DATA_DIR` > `~/.saltdock`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(env_val) = std::env::var("SALTDOCK_DATA_DIR") {
        return PathBuf::from(env_val);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".saltdock")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.default_target, "*");
        assert_eq!(config.default_command, "ls -lha");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "server_url = \"wss://suma.example.com\"\nsettle_timeout_secs = 30\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server_url, "wss://suma.example.com");
        assert_eq!(config.settle_timeout(), Duration::from_secs(30));
        assert_eq!(config.subprotocol, "protocolOne");
        assert_eq!(
            config.channel_config().endpoint(),
            "wss://suma.example.com/rhn/websocket/minion/remote-commands"
        );
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "settle_timeout_secs = \"soon\"").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = Path::new("/srv/saltdock");
        assert_eq!(resolve_data_dir(Some(dir)), dir.to_path_buf());
        assert_eq!(config_path(dir), dir.join("config.toml"));
        assert_eq!(log_dir(dir), dir.join("logs"));
    }
}
