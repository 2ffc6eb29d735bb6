// ABOUTME: Engine configuration: which engine, where, and how to stop containers.
// ABOUTME: Parsed from berth.yml and overridden by BERTH_* environment variables.

mod remote;

pub use remote::{RemoteConfig, RemoteTarget};

use crate::engine::{DEFAULT_STOP_TIMEOUT, EngineKind};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "berth.yml";
pub const CONFIG_FILENAME_ALT: &str = "berth.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".berth/config.yml";

pub const ENV_ENGINE: &str = "BERTH_ENGINE";
pub const ENV_SOCKET: &str = "BERTH_SOCKET";
pub const ENV_REMOTE_URI: &str = "BERTH_REMOTE_URI";
pub const ENV_IDENTITY: &str = "BERTH_IDENTITY";
pub const ENV_STOP_TIMEOUT: &str = "BERTH_STOP_TIMEOUT";

/// How to reach a container engine.
///
/// ```yaml
/// engine: podman
/// remote:
///   uri: ssh://ci@build-host:22/run/user/1000/podman/podman.sock
///   identity: ~/.ssh/id_ed25519
/// stop_timeout: 10s
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Engine to use; detected from local sockets when absent.
    #[serde(default)]
    pub engine: Option<EngineKind>,

    /// Local endpoint for `engine`; its default socket when absent.
    #[serde(default)]
    pub socket: Option<String>,

    /// Remote Podman reached through an SSH tunnel.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,

    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,
}

fn default_stop_timeout() -> Duration {
    DEFAULT_STOP_TIMEOUT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: None,
            socket: None,
            remote: None,
            stop_timeout: default_stop_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load the first config file found in `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading engine config");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Apply `BERTH_*` environment variables on top of this config.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(engine) = env_var(ENV_ENGINE) {
            let kind = engine.parse::<EngineKind>().map_err(|reason| Error::InvalidEnvVar {
                var: ENV_ENGINE.to_string(),
                reason,
            })?;
            self.engine = Some(kind);
        }

        if let Some(socket) = env_var(ENV_SOCKET) {
            self.socket = Some(socket);
        }

        if let Some(uri) = env_var(ENV_REMOTE_URI) {
            match self.remote.as_mut() {
                Some(remote) => remote.uri = uri,
                None => self.remote = Some(RemoteConfig::new(uri)),
            }
        }

        if let Some(identity) = env_var(ENV_IDENTITY) {
            let remote = self.remote.as_mut().ok_or_else(|| Error::InvalidEnvVar {
                var: ENV_IDENTITY.to_string(),
                reason: format!("needs a remote URI ({} or `remote.uri`)", ENV_REMOTE_URI),
            })?;
            remote.identity = Some(PathBuf::from(identity));
        }

        if let Some(timeout) = env_var(ENV_STOP_TIMEOUT) {
            self.stop_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| Error::InvalidEnvVar {
                    var: ENV_STOP_TIMEOUT.to_string(),
                    reason: e.to_string(),
                })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket.is_some() && self.engine.is_none() {
            return Err(Error::InvalidConfig(
                "`socket` needs `engine` to say which engine listens on it".to_string(),
            ));
        }

        if let Some(remote) = &self.remote {
            if self.socket.is_some() {
                return Err(Error::InvalidConfig(
                    "`socket` and `remote` cannot both be set".to_string(),
                ));
            }
            if self.engine == Some(EngineKind::Docker) {
                return Err(Error::InvalidConfig(
                    "remote engines over SSH are supported for podman only".to_string(),
                ));
            }
            remote.target()?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
