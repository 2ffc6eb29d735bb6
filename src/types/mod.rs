// ABOUTME: Typed identifiers shared by the engine adapters.
// ABOUTME: Keeps container and image ids from being swapped by accident.

mod id;

pub use id::{ContainerId, ImageId};
