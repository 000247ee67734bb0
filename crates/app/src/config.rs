//! Application configuration
//!
//! Read from `--config <path>` when given, else `watchparty.toml` in the
//! platform config directory, else built-in defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use watchparty_core::{read_toml, Error, Result, RoomLimits};

use crate::network::ReconnectPolicy;

const CONFIG_FILE: &str = "watchparty.toml";

/// Top-level config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

/// `[server]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub limits: RoomLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], watchparty_net::DEFAULT_PORT)),
            limits: RoomLimits::default(),
        }
    }
}

/// `[client]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the coordination server
    pub server: String,
    pub nickname: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// Episode catalog TOML
    pub catalog: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", watchparty_net::DEFAULT_PORT),
            nickname: None,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 10_000,
            catalog: None,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: self.reconnect_attempts,
            initial_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_delay: Duration::from_millis(self.max_reconnect_delay_ms),
        }
    }
}

impl AppConfig {
    /// Load config. An explicit path must exist; the default one may not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => read_toml(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => read_toml(&path)?,
                _ => {
                    tracing::debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// `watchparty.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "watchparty", "watchparty")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    fn validate(&self) -> Result<()> {
        self.server.limits.validate()?;
        if self.client.server.trim().is_empty() {
            return Err(Error::Config("client.server must not be empty".into()));
        }
        if self.client.max_reconnect_delay_ms < self.client.reconnect_delay_ms {
            return Err(Error::Config(
                "client.max_reconnect_delay_ms must not be below reconnect_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind.port(), 7341);
        assert_eq!(config.client.server, "127.0.0.1:7341");
        assert_eq!(config.client.reconnect_attempts, 5);
        assert!(config.client.nickname.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9000"

[server.limits]
max_members = 4

[client]
nickname = "Yui"
catalog = "episodes.toml"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.server.limits.max_members, 4);
        assert_eq!(config.server.limits.chat_history, 100);
        assert_eq!(config.client.nickname.as_deref(), Some("Yui"));
        assert_eq!(config.client.catalog, Some(PathBuf::from("episodes.toml")));
        assert_eq!(config.client.reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[server.limits]\nmax_rooms = 0\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(Error::Config(_))));

        fs::write(
            &path,
            "[client]\nreconnect_delay_ms = 5000\nmax_reconnect_delay_ms = 100\n",
        )
        .unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_reconnect_policy() {
        let policy = ClientConfig::default().reconnect_policy();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }
}
