// ABOUTME: Builds a boxed RuntimeEngine from EngineConfig.
// ABOUTME: Detects the local engine when none is configured and pings it once.

use super::detection::{DetectionError, detect_local};
use super::docker::DockerEngine;
use super::error::{
    ConfigSnafu, ConnectError, DetectionSnafu, EngineError, EngineSnafu, TunnelSnafu,
};
use super::podman::PodmanEngine;
use super::traits::RuntimeEngine;
use super::types::{EngineEndpoint, EngineKind};
use crate::config::{EngineConfig, RemoteConfig};
use crate::ssh::Session;
use snafu::ResultExt;
use std::time::Duration;

/// Which local endpoint `config` points at, detecting one if the config
/// names no engine.
pub fn resolve_endpoint(config: &EngineConfig) -> Result<EngineEndpoint, DetectionError> {
    match (config.engine, &config.socket) {
        (Some(kind), Some(socket)) => Ok(EngineEndpoint::new(kind, socket.clone())),
        (Some(kind), None) => Ok(EngineEndpoint::default_for(kind)),
        (None, _) => detect_local(),
    }
}

/// Build the engine `config` describes and check that it answers.
///
/// An engine that does not answer the ping is closed again before the
/// error is returned, so a failed connect leaves no tunnel behind.
pub async fn connect(config: &EngineConfig) -> Result<Box<dyn RuntimeEngine>, ConnectError> {
    config.validate().context(ConfigSnafu)?;

    let engine: Box<dyn RuntimeEngine> = match &config.remote {
        Some(remote) => Box::new(connect_remote(remote, config.stop_timeout).await?),
        None => {
            let endpoint = resolve_endpoint(config).context(DetectionSnafu)?;
            connect_local(&endpoint, config.stop_timeout)?
        }
    };

    if let Err(source) = engine.ping().await {
        if let Err(e) = engine.close().await {
            tracing::warn!("failed to close unreachable engine: {}", e);
        }
        return Err(ConnectError::Engine { source });
    }

    tracing::debug!(engine = %engine.kind(), "engine ready");
    Ok(engine)
}

/// [`connect`] with the default configuration plus `BERTH_*` overrides.
pub async fn connect_from_env() -> Result<Box<dyn RuntimeEngine>, ConnectError> {
    let config = EngineConfig::default()
        .with_env_overrides()
        .context(ConfigSnafu)?;
    connect(&config).await
}

fn connect_local(
    endpoint: &EngineEndpoint,
    stop_timeout: Duration,
) -> Result<Box<dyn RuntimeEngine>, ConnectError> {
    tracing::debug!(engine = %endpoint.kind, socket = %endpoint.socket, "connecting");
    match endpoint.kind {
        EngineKind::Docker => {
            let engine = DockerEngine::connect(&endpoint.socket).context(EngineSnafu)?;
            Ok(Box::new(engine.with_stop_timeout(stop_timeout)))
        }
        EngineKind::Podman => {
            let path = endpoint.unix_path().ok_or_else(|| ConnectError::Engine {
                source: EngineError::Unavailable(format!(
                    "podman needs a unix socket, got {}",
                    endpoint.socket
                )),
            })?;
            Ok(Box::new(
                PodmanEngine::local(path).with_stop_timeout(stop_timeout),
            ))
        }
    }
}

async fn connect_remote(
    remote: &RemoteConfig,
    stop_timeout: Duration,
) -> Result<PodmanEngine, ConnectError> {
    let target = remote.target().context(ConfigSnafu)?;
    tracing::debug!(host = %target.host, socket = %target.socket, "opening SSH tunnel");

    let session = Session::connect(remote.session_config(&target))
        .await
        .context(TunnelSnafu { host: &target.host })?;
    let engine = PodmanEngine::over_ssh(session, &target.socket)
        .await
        .context(TunnelSnafu { host: &target.host })?;
    Ok(engine.with_stop_timeout(stop_timeout))
}
