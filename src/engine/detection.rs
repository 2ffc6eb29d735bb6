// ABOUTME: Local engine detection by probing well-known sockets.
// ABOUTME: Honors DOCKER_HOST, then checks Podman sockets before Docker.

use super::types::{DOCKER_SOCKET, EngineEndpoint, EngineKind, ROOTFUL_PODMAN};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("no container engine found (checked DOCKER_HOST, Podman and Docker sockets)")]
    NoEngineFound,
}

/// Detect a container engine on this host.
///
/// Detection order:
/// 1. `DOCKER_HOST`, if set
/// 2. Rootless Podman socket (`/run/user/$UID/podman/podman.sock`)
/// 3. Rootful Podman socket (`/run/podman/podman.sock`)
/// 4. Docker socket (`/var/run/docker.sock`)
pub fn detect_local() -> Result<EngineEndpoint, DetectionError> {
    if let Ok(host) = std::env::var("DOCKER_HOST")
        && !host.trim().is_empty()
    {
        tracing::debug!(%host, "using DOCKER_HOST");
        return Ok(EngineEndpoint::new(EngineKind::Docker, host.trim()));
    }

    if let Some(uid) = get_uid() {
        let rootless = format!("/run/user/{}/podman/podman.sock", uid);
        if Path::new(&rootless).exists() {
            return Ok(EngineEndpoint::new(EngineKind::Podman, rootless));
        }
    }

    if Path::new(ROOTFUL_PODMAN).exists() {
        return Ok(EngineEndpoint::new(EngineKind::Podman, ROOTFUL_PODMAN));
    }

    if Path::new(DOCKER_SOCKET).exists() {
        return Ok(EngineEndpoint::new(EngineKind::Docker, DOCKER_SOCKET));
    }

    Err(DetectionError::NoEngineFound)
}

fn get_uid() -> Option<String> {
    std::env::var("UID").ok().or_else(|| {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| {
                status
                    .lines()
                    .find(|l| l.starts_with("Uid:"))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(str::to_string)
            })
    })
}
