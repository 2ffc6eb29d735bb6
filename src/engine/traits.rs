// ABOUTME: The capability contract every engine adapter implements.
// ABOUTME: run/start/stop/delete/logs on handles, plus engine-level close.

use super::error::EngineError;
use super::handle::ContainerHandle;
use super::sealed::Sealed;
use super::types::EngineKind;
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use std::time::Duration;

/// Grace period `stop()` gives a container before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole seconds for an engine's stop timeout, rounded up so a sub-second
/// grace period is not turned into an immediate kill.
pub(crate) fn grace_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Container lifecycle operations, independent of the engine behind them.
///
/// Each call awaits until the engine has answered. A handle is taken by
/// `&mut` for calls that change its flags, so a single handle is never
/// driven from two tasks at once. Separate handles from one engine may be
/// used concurrently; the adapters are `Send + Sync` and add no locking of
/// their own beyond what the native client does.
///
/// Nothing here retries. Failures come back as:
/// - [`EngineError::Unavailable`] when the engine cannot be reached,
///   including after [`close`](RuntimeEngine::close)
/// - [`EngineError::ContainerNotFound`] when the handle's id no longer
///   resolves, or the handle was already deleted
#[async_trait]
pub trait RuntimeEngine: Sealed + Send + Sync {
    /// Which engine this adapter talks to.
    fn kind(&self) -> EngineKind;

    /// Create and start a container from `spec`, pulling its image first
    /// if the engine does not have it.
    ///
    /// When the spec is not detached, also waits for the container's main
    /// process to exit before returning.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError>;

    /// Start a created or stopped container.
    async fn start(&self, handle: &mut ContainerHandle) -> Result<(), EngineError>;

    /// Stop a running container, killing it after the stop timeout.
    async fn stop(&self, handle: &mut ContainerHandle) -> Result<(), EngineError>;

    /// Force-remove the container whether or not it is running.
    async fn delete_container(&self, handle: &mut ContainerHandle) -> Result<(), EngineError>;

    /// Everything the container has written to stdout and stderr so far.
    async fn logs(&self, handle: &ContainerHandle) -> Result<String, EngineError>;

    /// Check that the engine answers.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Release connections and tunnels held by the adapter. Safe to call
    /// more than once.
    async fn close(&self) -> Result<(), EngineError>;
}
