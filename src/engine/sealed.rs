// ABOUTME: Sealed trait pattern for the engine trait.
// ABOUTME: Only adapters in this crate can implement RuntimeEngine.

/// Implemented by the crate's own adapters, so methods can be added to
/// `RuntimeEngine` without breaking downstream code.
pub trait Sealed {}
