// ABOUTME: Docker adapter built on bollard and the Docker HTTP API.
// ABOUTME: Ports and binds go in as native HostConfig collections.

use super::error::EngineError;
use super::handle::ContainerHandle;
use super::sealed::Sealed;
use super::traits::{DEFAULT_STOP_TIMEOUT, RuntimeEngine, grace_secs};
use super::types::EngineKind;
use crate::spec::{ContainerSpec, VolumeBinding};
use crate::types::ContainerId;
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Client-side timeout for a single Docker API request, in seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_container_error(e: bollard::errors::Error, id: &ContainerId) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::ContainerNotFound(format!("{}: {}", id.short(), message)),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Rejected(format!("{} ({})", message, status_code)),
        other => EngineError::Unavailable(other.to_string()),
    }
}

fn map_create_error(e: bollard::errors::Error) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Rejected(format!("create failed: {} ({})", message, status_code)),
        other => EngineError::Unavailable(other.to_string()),
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

// =============================================================================
// Spec Translation
// =============================================================================

/// Docker's key for a container port: `80` becomes `80/tcp`.
fn port_key(container_port: &str) -> String {
    if container_port.contains('/') {
        container_port.to_string()
    } else {
        format!("{}/tcp", container_port)
    }
}

/// A host side of `8080` or `127.0.0.1:8080`.
fn port_binding(host: &str) -> PortBinding {
    match host.rsplit_once(':') {
        Some((ip, port)) => PortBinding {
            host_ip: Some(ip.to_string()),
            host_port: Some(port.to_string()),
        },
        None => PortBinding {
            host_ip: None,
            host_port: Some(host.to_string()),
        },
    }
}

fn bind(host_path: &str, binding: &VolumeBinding) -> String {
    if binding.mode.is_empty() {
        format!("{}:{}", host_path, binding.bind)
    } else {
        format!("{}:{}:{}", host_path, binding.bind, binding.mode)
    }
}

/// Translate a spec into Docker's create body. The only place that knows
/// Docker's argument shapes.
fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let env: Vec<String> = spec
        .environment()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    // Docker keys bindings by container port, the same way round as the spec.
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: Vec<String> = Vec::new();
    for (container_port, host_port) in spec.ports() {
        let key = port_key(container_port);
        exposed_ports.push(key.clone());
        port_bindings.insert(key, Some(vec![port_binding(host_port)]));
    }

    let binds: Vec<String> = spec
        .volumes()
        .iter()
        .map(|(host, binding)| bind(host, binding))
        .collect();

    let host_config = HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: (!binds.is_empty()).then_some(binds),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image_repotag()),
        env: (!env.is_empty()).then_some(env),
        cmd: (!spec.command().is_empty()).then(|| spec.command().to_vec()),
        entrypoint: spec
            .entrypoint()
            .map(|e| e.split_whitespace().map(str::to_string).collect()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

// =============================================================================
// DockerEngine
// =============================================================================

/// Engine adapter for a Docker daemon.
pub struct DockerEngine {
    client: Docker,
    stop_timeout: Duration,
    closed: AtomicBool,
}

impl DockerEngine {
    pub fn new(client: Docker) -> Self {
        Self {
            client,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to `endpoint`: a socket path, `unix://` URI, or a
    /// `tcp://`/`http://` address.
    pub fn connect(endpoint: &str) -> Result<Self, EngineError> {
        let version = bollard::API_DEFAULT_VERSION;
        let client = match endpoint.split_once("://") {
            Some(("tcp" | "http", _)) => {
                Docker::connect_with_http(endpoint, CLIENT_TIMEOUT_SECS, version)
            }
            Some(("unix", path)) => Docker::connect_with_unix(path, CLIENT_TIMEOUT_SECS, version),
            Some((scheme, _)) => {
                return Err(EngineError::Unavailable(format!(
                    "unsupported Docker endpoint scheme: {}",
                    scheme
                )));
            }
            None => Docker::connect_with_unix(endpoint, CLIENT_TIMEOUT_SECS, version),
        }
        .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        tracing::debug!(%endpoint, "connected Docker client");
        Ok(Self::new(client))
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn client(&self) -> Result<&Docker, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::closed());
        }
        Ok(&self.client)
    }

    async fn create(
        &self,
        body: ContainerCreateBody,
    ) -> Result<ContainerId, bollard::errors::Error> {
        let response = self
            .client
            .create_container(None::<CreateContainerOptions>, body)
            .await?;
        for warning in &response.warnings {
            tracing::warn!(id = %response.id, "docker create: {}", warning);
        }
        Ok(ContainerId::new(response.id))
    }

    async fn pull(&self, reference: &str) -> Result<(), EngineError> {
        tracing::info!(image = %reference, "pulling image");
        let opts = CreateImageOptions {
            from_image: Some(reference.to_string()),
            ..Default::default()
        };

        // Progress arrives as a stream; an error in any item fails the pull.
        let mut stream = self.client.create_image(Some(opts), None, None);
        while let Some(item) = stream.next().await {
            item.map_err(|e| EngineError::ImagePullFailed {
                image: reference.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Best-effort force removal of a container `run` could not finish.
    async fn discard(&self, id: &ContainerId) {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.client.remove_container(id.as_str(), Some(opts)).await {
            tracing::warn!(id = %id.short(), "failed to remove container after failed run: {}", e);
        }
    }

    async fn wait(&self, id: &ContainerId) -> Result<(), EngineError> {
        let mut stream = self
            .client
            .wait_container(id.as_str(), None::<WaitContainerOptions>);
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => {}
                // bollard reports a non-zero exit code as an error; the
                // container has still exited.
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    tracing::debug!(id = %id.short(), code, "container exited");
                }
                Err(e) => return Err(map_container_error(e, id)),
            }
        }
        Ok(())
    }
}

impl Sealed for DockerEngine {}

#[async_trait]
impl RuntimeEngine for DockerEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Docker
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        spec.validate()?;
        self.client()?;

        let reference = spec.image_repotag();
        let body = create_body(spec);

        // The API does not pull on create; a 404 means the image is missing.
        let id = match self.create(body.clone()).await {
            Ok(id) => id,
            Err(e) if is_not_found(&e) => {
                self.pull(&reference).await?;
                self.create(body).await.map_err(map_create_error)?
            }
            Err(e) => return Err(map_create_error(e)),
        };
        tracing::debug!(id = %id.short(), image = %reference, "created container");

        let mut handle = ContainerHandle::created(id);
        let started = match self.start(&mut handle).await {
            Ok(()) if !spec.is_detached() => self.wait(handle.id()).await,
            other => other,
        };

        // No handle escapes a failed run, so nothing else could remove it.
        if let Err(e) = started {
            self.discard(handle.id()).await;
            return Err(e);
        }
        Ok(handle)
    }

    async fn start(&self, handle: &mut ContainerHandle) -> Result<(), EngineError> {
        let id = handle.ensure_live()?.clone();
        match self
            .client()?
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_modified(&e) => {
                tracing::debug!(id = %id.short(), "container already running");
            }
            Err(e) => return Err(map_container_error(e, &id)),
        }
        handle.mark_started();
        Ok(())
    }

    async fn stop(&self, handle: &mut ContainerHandle) -> Result<(), EngineError> {
        let id = handle.ensure_live()?.clone();
        let opts = StopContainerOptions {
            t: Some(i32::try_from(grace_secs(self.stop_timeout)).unwrap_or(i32::MAX)),
            signal: None,
        };
        match self.client()?.stop_container(id.as_str(), Some(opts)).await {
            Ok(()) => {}
            Err(e) if is_not_modified(&e) => {
                tracing::debug!(id = %id.short(), "container already stopped");
            }
            Err(e) => return Err(map_container_error(e, &id)),
        }
        handle.mark_stopped();
        Ok(())
    }

    async fn delete_container(&self, handle: &mut ContainerHandle) -> Result<(), EngineError> {
        let id = handle.ensure_live()?.clone();
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.client()?
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(|e| map_container_error(e, &id))?;
        tracing::debug!(id = %id.short(), "removed container");
        handle.mark_deleted();
        Ok(())
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, EngineError> {
        let id = handle.ensure_live()?;
        let opts = LogsOptions {
            stdout: true,
            stderr: true,
            follow: false,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.client()?.logs(id.as_str(), Some(opts));
        let mut output = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_container_error(e, id))?;
            output.extend_from_slice(&chunk.into_bytes());
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.client()?
            .ping()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("closed Docker engine adapter");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineErrorKind;

    #[test]
    fn ports_keep_container_side_as_key() {
        let spec = ContainerSpec::new("nginx")
            .with_port("80", "8080")
            .with_port("53/udp", "127.0.0.1:5353");
        let body = create_body(&spec);

        let bindings = body.host_config.unwrap().port_bindings.unwrap();
        let tcp = bindings["80/tcp"].as_ref().unwrap();
        assert_eq!(tcp[0].host_port.as_deref(), Some("8080"));
        assert!(tcp[0].host_ip.is_none());

        let udp = bindings["53/udp"].as_ref().unwrap();
        assert_eq!(udp[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(udp[0].host_port.as_deref(), Some("5353"));

        let mut exposed = body.exposed_ports.unwrap();
        exposed.sort();
        assert_eq!(exposed, vec!["53/udp".to_string(), "80/tcp".to_string()]);
    }

    #[test]
    fn volumes_become_binds_with_mode() {
        let spec = ContainerSpec::new("busybox")
            .with_volume("/host/a", "/container/a", None)
            .with_volume("/host/b", "/container/b", Some("ro"));
        let binds = create_body(&spec).host_config.unwrap().binds.unwrap();
        assert_eq!(
            binds,
            vec![
                "/host/a:/container/a:Z".to_string(),
                "/host/b:/container/b:ro".to_string()
            ]
        );
    }

    #[test]
    fn minimal_spec_leaves_optional_fields_unset() {
        let body = create_body(&ContainerSpec::new("busybox"));
        assert_eq!(body.image.as_deref(), Some("busybox:latest"));
        assert!(body.env.is_none());
        assert!(body.cmd.is_none());
        assert!(body.entrypoint.is_none());
        assert!(body.exposed_ports.is_none());
        let host_config = body.host_config.unwrap();
        assert!(host_config.binds.is_none());
        assert!(host_config.port_bindings.is_none());
    }

    #[test]
    fn entrypoint_and_command_are_split_into_argv() {
        let spec = ContainerSpec::new("busybox")
            .with_entrypoint("/bin/sh -c")
            .with_command(["echo hello"])
            .with_env("GREETING", "hi");
        let body = create_body(&spec);
        assert_eq!(
            body.entrypoint,
            Some(vec!["/bin/sh".to_string(), "-c".to_string()])
        );
        assert_eq!(body.cmd, Some(vec!["echo hello".to_string()]));
        assert_eq!(body.env, Some(vec!["GREETING=hi".to_string()]));
    }

    fn server_error(status_code: u16, message: &str) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn container_errors_map_by_status() {
        let id = ContainerId::new("0123456789abcdef");

        let err = map_container_error(server_error(404, "No such container"), &id);
        assert!(matches!(
            err,
            EngineError::ContainerNotFound(ref msg) if msg.starts_with("0123456789ab")
        ));

        let err = map_container_error(server_error(409, "removal in progress"), &id);
        assert_eq!(err.kind(), EngineErrorKind::Rejected);
        assert!(err.to_string().contains("409"));

        let err = map_container_error(bollard::errors::Error::RequestTimeoutError, &id);
        assert_eq!(err.kind(), EngineErrorKind::EngineUnavailable);
    }

    #[test]
    fn create_errors_are_rejected_or_unavailable() {
        let err = map_create_error(server_error(400, "invalid port specification"));
        assert_eq!(err.kind(), EngineErrorKind::Rejected);
        assert!(err.to_string().contains("invalid port specification"));

        let err = map_create_error(bollard::errors::Error::RequestTimeoutError);
        assert_eq!(err.kind(), EngineErrorKind::EngineUnavailable);
    }

    #[test]
    fn status_predicates() {
        assert!(is_not_modified(&server_error(304, "")));
        assert!(!is_not_modified(&server_error(404, "")));
        assert!(is_not_found(&server_error(404, "No such image")));
        assert!(!is_not_found(&server_error(500, "")));
        assert!(!is_not_found(&bollard::errors::Error::RequestTimeoutError));
    }

    #[tokio::test]
    async fn invalid_spec_fails_before_contacting_daemon() {
        let engine = DockerEngine::connect("/nonexistent/berth/docker.sock").unwrap();

        let err = engine
            .run(&ContainerSpec::new("busybox").with_port("80", "80:x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidSpec(crate::spec::SpecError::InvalidPort(_))
        ));

        let err = engine
            .run(&ContainerSpec::new("busybox").with_volume("/srv", "data", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::InvalidSpec);
    }

    #[test]
    fn unknown_scheme_is_unavailable() {
        let err = DockerEngine::connect("ssh://host").err().unwrap();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
