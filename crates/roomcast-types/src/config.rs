//! Configuration loading from `~/.roomcast/config.toml` with defaults.

use crate::error::{RoomcastError, RoomcastResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default TCP port a host listens on.
pub const DEFAULT_PORT: u16 = 27064;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastConfig {
    /// Log filter used when `RUST_LOG` is unset. Default: "info".
    pub log_level: String,
    /// Session/transport settings.
    pub session: SessionConfig,
    /// Invocation registry settings.
    pub rpc: RpcConfig,
}

impl Default for RoomcastConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            session: SessionConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

impl RoomcastConfig {
    /// Reject settings no session could run with.
    pub fn validate(&self) -> RoomcastResult<()> {
        if self.session.max_peers == 0 {
            return Err(RoomcastError::Config(
                "session.max_peers must be at least 1".to_string(),
            ));
        }
        if self.session.peer_name.trim().is_empty() {
            return Err(RoomcastError::Config(
                "session.peer_name must not be empty".to_string(),
            ));
        }
        if matches!(&self.session.shared_secret, Some(s) if s.is_empty()) {
            return Err(RoomcastError::Config(
                "session.shared_secret is set but empty; remove it to run an open session"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Session and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address the host binds. Default: 127.0.0.1:27064.
    pub listen_addr: SocketAddr,
    /// Display name advertised in the handshake.
    pub peer_name: String,
    /// Pre-shared key for HMAC peer authentication. `None` admits every peer
    /// as authenticated.
    pub shared_secret: Option<String>,
    /// Maximum number of clients a host admits. Default: 32.
    pub max_peers: usize,
    /// Seconds a handshake may take before the link is dropped. Default: 15.
    pub handshake_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            peer_name: "roomcast-peer".to_string(),
            shared_secret: None,
            max_peers: 32,
            handshake_timeout_secs: 15,
        }
    }
}

/// What the invocation registry does when a name is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Replace the earlier definition and log a warning.
    #[default]
    Overwrite,
    /// Refuse the second registration.
    Reject,
}

/// Invocation registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Behaviour on duplicate invocation names.
    pub collision_policy: CollisionPolicy,
}

/// Default config location: `~/.roomcast/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".roomcast")
        .join("config.toml")
}

/// Load configuration from a TOML file, falling back to defaults.
///
/// A missing, unreadable or unparsable file is logged and replaced by
/// [`RoomcastConfig::default`]; startup never fails on config alone.
pub fn load_config(path: Option<&Path>) -> RoomcastConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return RoomcastConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<RoomcastConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                RoomcastConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            RoomcastConfig::default()
        }
    }
}
