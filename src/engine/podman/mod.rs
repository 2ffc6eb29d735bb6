// ABOUTME: Podman engine: libpod REST client plus the RuntimeEngine adapter.
// ABOUTME: Works on a local socket or one forwarded over SSH.

mod client;
mod engine;

pub use client::{Container, CreateArgs, Image, Images, PodmanClient, PodmanError};
pub use engine::PodmanEngine;
