// ABOUTME: Error types for engine operations and engine construction.
// ABOUTME: EngineError for per-call failures, ConnectError (SNAFU) for setup.

use snafu::Snafu;

use super::detection::DetectionError;
use crate::spec::SpecError;

/// Failure of a single engine operation. Never retried inside this crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine's API or socket could not be reached, or the adapter
    /// has been closed.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("failed to pull {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("invalid container spec: {0}")]
    InvalidSpec(#[from] SpecError),

    /// The engine answered but refused the request.
    #[error("engine rejected request: {0}")]
    Rejected(String),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    EngineUnavailable,
    ContainerNotFound,
    ImagePullFailed,
    InvalidSpec,
    Rejected,
}

impl EngineError {
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            EngineError::Unavailable(_) => EngineErrorKind::EngineUnavailable,
            EngineError::ContainerNotFound(_) => EngineErrorKind::ContainerNotFound,
            EngineError::ImagePullFailed { .. } => EngineErrorKind::ImagePullFailed,
            EngineError::InvalidSpec(_) => EngineErrorKind::InvalidSpec,
            EngineError::Rejected(_) => EngineErrorKind::Rejected,
        }
    }

    pub(crate) fn closed() -> Self {
        EngineError::Unavailable("engine adapter has been closed".to_string())
    }
}

/// Failure to build a working engine from configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConnectError {
    #[snafu(display("invalid engine configuration: {source}"))]
    Config { source: crate::error::Error },

    #[snafu(display("engine detection failed: {source}"))]
    Detection { source: DetectionError },

    #[snafu(display("SSH tunnel to {host} failed: {source}"))]
    Tunnel {
        host: String,
        source: crate::ssh::Error,
    },

    #[snafu(display("engine connection failed: {source}"))]
    Engine { source: EngineError },
}

/// Error kind for programmatic handling of [`ConnectError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    InvalidConfig,
    NoEngineFound,
    TunnelFailed,
    EngineUnavailable,
}

impl ConnectError {
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            ConnectError::Config { .. } => ConnectErrorKind::InvalidConfig,
            ConnectError::Detection { .. } => ConnectErrorKind::NoEngineFound,
            ConnectError::Tunnel { .. } => ConnectErrorKind::TunnelFailed,
            ConnectError::Engine { .. } => ConnectErrorKind::EngineUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            EngineError::closed().kind(),
            EngineErrorKind::EngineUnavailable
        );
        assert_eq!(
            EngineError::ImagePullFailed {
                image: "busybox:latest".to_string(),
                reason: "manifest unknown".to_string(),
            }
            .kind(),
            EngineErrorKind::ImagePullFailed
        );
        assert_eq!(
            EngineError::from(SpecError::VolumeNotAttached("/host/a".to_string())).kind(),
            EngineErrorKind::InvalidSpec
        );
    }

    #[test]
    fn connect_kind_reports_detection() {
        let err = ConnectError::Detection {
            source: DetectionError::NoEngineFound,
        };
        assert_eq!(err.kind(), ConnectErrorKind::NoEngineFound);
        assert!(err.to_string().contains("no container engine found"));
    }
}
