// ABOUTME: Library root for berth: run disposable containers from tests.
// ABOUTME: One engine interface over Docker and Podman, local or over SSH.

pub mod config;
pub mod engine;
pub mod error;
pub mod spec;
pub mod ssh;
pub mod types;

pub use engine::{ContainerHandle, EngineError, RuntimeEngine, connect, connect_from_env};
pub use spec::ContainerSpec;
