// ABOUTME: Podman adapter over the libpod client, locally or through SSH.
// ABOUTME: Translates specs into podman's -p/-v token grammar.

use super::client::{CreateArgs, PodmanClient, PodmanError};
use crate::engine::error::EngineError;
use crate::engine::handle::ContainerHandle;
use crate::engine::sealed::Sealed;
use crate::engine::traits::{DEFAULT_STOP_TIMEOUT, RuntimeEngine};
use crate::engine::types::EngineKind;
use crate::spec::{ContainerSpec, SpecError, VolumeBinding};
use crate::ssh::Session;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

impl From<PodmanError> for EngineError {
    fn from(e: PodmanError) -> Self {
        match e {
            PodmanError::Connect { .. } => EngineError::Unavailable(e.to_string()),
            PodmanError::ContainerNotFound(msg) => EngineError::ContainerNotFound(msg),
            PodmanError::InvalidPublish(token) => SpecError::InvalidPort(token).into(),
            PodmanError::InvalidVolume(token) => SpecError::InvalidVolume(token).into(),
            PodmanError::ImageNotFound(_) | PodmanError::Status { .. } | PodmanError::Decode(_) => {
                EngineError::Rejected(e.to_string())
            }
        }
    }
}

fn pull_error(reference: &str, e: PodmanError) -> EngineError {
    match e {
        PodmanError::Connect { .. } => e.into(),
        other => EngineError::ImagePullFailed {
            image: reference.to_string(),
            reason: other.to_string(),
        },
    }
}

fn volume_token(host_path: &str, binding: &VolumeBinding) -> String {
    if binding.mode.is_empty() {
        format!("{}:{}", host_path, binding.bind)
    } else {
        format!("{}:{}:{}", host_path, binding.bind, binding.mode)
    }
}

/// Translate a spec into podman create arguments. The only place that
/// knows podman's argument grammar.
fn create_args(spec: &ContainerSpec) -> CreateArgs {
    CreateArgs {
        env: spec.environment().clone(),
        // podman publishes host:container, the reverse of the spec's keying.
        publish: spec
            .ports()
            .iter()
            .map(|(container, host)| format!("{}:{}", host, container))
            .collect(),
        volume: spec
            .volumes()
            .iter()
            .map(|(host, binding)| volume_token(host, binding))
            .collect(),
        entrypoint: spec
            .entrypoint()
            .map(|e| e.split_whitespace().map(str::to_string).collect()),
        command: spec.command().to_vec(),
    }
}

/// Engine adapter for Podman's libpod API.
///
/// Built either on a local socket ([`PodmanEngine::local`]) or on a socket
/// forwarded from a remote host over SSH ([`PodmanEngine::over_ssh`]). In the
/// second case the adapter owns the SSH session and `close()` tears the
/// tunnel down.
pub struct PodmanEngine {
    client: PodmanClient,
    tunnel: Mutex<Option<Session>>,
    stop_timeout: Duration,
    closed: AtomicBool,
}

impl PodmanEngine {
    pub fn local(socket: impl Into<PathBuf>) -> Self {
        Self {
            client: PodmanClient::new(socket),
            tunnel: Mutex::new(None),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            closed: AtomicBool::new(false),
        }
    }

    /// Forward `remote_socket` through `session` and talk to libpod through
    /// the local end of the tunnel.
    pub async fn over_ssh(session: Session, remote_socket: &str) -> crate::ssh::Result<Self> {
        let local_socket = session.forward_socket(remote_socket).await?;
        tracing::debug!(%remote_socket, %local_socket, "forwarded podman socket");
        let mut engine = Self::local(local_socket);
        engine.tunnel = Mutex::new(Some(session));
        Ok(engine)
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn is_tunnelled(&self) -> bool {
        self.tunnel.lock().is_some()
    }

    fn client(&self) -> Result<&PodmanClient, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::closed());
        }
        Ok(&self.client)
    }
}

impl Sealed for PodmanEngine {}

#[async_trait]
impl RuntimeEngine for PodmanEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Podman
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        spec.validate()?;
        let images = self.client()?.images();
        let reference = spec.image_repotag();

        // libpod does not pull on create: look up, pull on a miss, look up again.
        let image = match images.get(&reference).await {
            Ok(image) => image,
            Err(PodmanError::ImageNotFound(_)) => {
                tracing::info!(image = %reference, "pulling image");
                images
                    .pull(&reference)
                    .await
                    .map_err(|e| pull_error(&reference, e))?;
                images
                    .get(&reference)
                    .await
                    .map_err(|e| pull_error(&reference, e))?
            }
            Err(e) => return Err(e.into()),
        };

        let container = image.create_container(&create_args(spec)).await?;
        tracing::debug!(id = %container.id().short(), image = %reference, "created container");

        let started = async {
            container.start().await?;
            if !spec.is_detached() {
                let code = container.wait().await?;
                tracing::debug!(id = %container.id().short(), code, "container exited");
            }
            Ok::<_, PodmanError>(())
        }
        .await;

        // No handle escapes a failed run, so nothing else could remove it.
        if let Err(e) = started {
            if let Err(cleanup) = container.remove(true).await {
                tracing::warn!(
                    id = %container.id().short(),
                    "failed to remove container after failed run: {}",
                    cleanup
                );
            }
            return Err(e.into());
        }

        let mut handle = ContainerHandle::created(container.into_id());
        handle.mark_started();
        Ok(handle)
    }

    async fn start(&self, handle: &mut ContainerHandle) -> Result<(), EngineError> {
        let id = handle.ensure_live()?.clone();
        self.client()?.container(id).start().await?;
        handle.mark_started();
        Ok(())
    }

    async fn stop(&self, handle: &mut ContainerHandle) -> Result<(), EngineError> {
        let id = handle.ensure_live()?.clone();
        self.client()?.container(id).stop(self.stop_timeout).await?;
        handle.mark_stopped();
        Ok(())
    }

    async fn delete_container(&self, handle: &mut ContainerHandle) -> Result<(), EngineError> {
        let id = handle.ensure_live()?.clone();
        self.client()?.container(id).remove(true).await?;
        handle.mark_deleted();
        Ok(())
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, EngineError> {
        let id = handle.ensure_live()?.clone();
        let chunks = self.client()?.container(id).logs().await?;
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.client()?.ping().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Take the session out before awaiting so the lock is not held.
        let session = self.tunnel.lock().take();
        if let Some(session) = session {
            session
                .disconnect()
                .await
                .map_err(|e| EngineError::Unavailable(format!("SSH disconnect failed: {}", e)))?;
            tracing::debug!("closed podman SSH tunnel");
        }
        Ok(())
    }
}
