// ABOUTME: Engine kinds and the socket endpoint an adapter connects to.
// ABOUTME: EngineKind is also the value of the `engine` config key.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub(crate) const DOCKER_SOCKET: &str = "/var/run/docker.sock";
pub(crate) const ROOTFUL_PODMAN: &str = "/run/podman/podman.sock";

/// The container engine behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Docker,
    Podman,
}

impl EngineKind {
    /// Socket the engine listens on when installed with its defaults.
    pub fn default_socket(self) -> &'static str {
        match self {
            EngineKind::Docker => DOCKER_SOCKET,
            EngineKind::Podman => ROOTFUL_PODMAN,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Docker => write!(f, "docker"),
            EngineKind::Podman => write!(f, "podman"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(EngineKind::Docker),
            "podman" => Ok(EngineKind::Podman),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// A reachable engine: which kind, and where its API socket is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    pub kind: EngineKind,
    /// Socket path, `unix://` URI, or for Docker a `tcp://`/`http://` address.
    pub socket: String,
}

impl EngineEndpoint {
    pub fn new(kind: EngineKind, socket: impl Into<String>) -> Self {
        Self {
            kind,
            socket: socket.into(),
        }
    }

    pub fn default_for(kind: EngineKind) -> Self {
        Self::new(kind, kind.default_socket())
    }

    /// The filesystem path of a Unix socket endpoint, without any scheme.
    pub fn unix_path(&self) -> Option<&str> {
        match self.socket.split_once("://") {
            Some(("unix", path)) => Some(path),
            Some(_) => None,
            None => Some(&self.socket),
        }
    }
}
