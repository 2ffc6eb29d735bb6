// ABOUTME: Container engine abstraction: one trait, Docker and Podman adapters.
// ABOUTME: Also engine detection and construction from EngineConfig.

mod connect;
mod detection;
mod docker;
mod error;
mod handle;
pub mod podman;
pub(crate) mod sealed;
mod traits;
mod types;

pub use connect::{connect, connect_from_env, resolve_endpoint};
pub use detection::{DetectionError, detect_local};
pub use docker::DockerEngine;
pub use error::{ConnectError, ConnectErrorKind, EngineError, EngineErrorKind};
pub use handle::ContainerHandle;
pub use podman::PodmanEngine;
pub use traits::{DEFAULT_STOP_TIMEOUT, RuntimeEngine};
pub use types::{EngineEndpoint, EngineKind};
