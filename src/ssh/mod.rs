// ABOUTME: SSH sessions for reaching engines on remote hosts.
// ABOUTME: Forwards a remote Unix socket to a local one over direct-streamlocal.

mod client;
mod error;
mod forward;

pub use client::{Session, SessionConfig};
pub use error::{Error, Result};
pub use forward::ForwardHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn session_config_builder() {
        let config = SessionConfig::new("build-host", "ci")
            .port(2222)
            .key_path("/keys/id_ed25519")
            .trust_on_first_use(true)
            .known_hosts_path("/tmp/known_hosts");

        assert_eq!(config.host, "build-host");
        assert_eq!(config.user, "ci");
        assert_eq!(config.port, 2222);
        assert_eq!(config.key_path, Some(PathBuf::from("/keys/id_ed25519")));
        assert!(config.trust_on_first_use);
        assert_eq!(config.known_hosts_path, Some(PathBuf::from("/tmp/known_hosts")));
    }

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::new("h", "u");
        assert_eq!(config.port, 22);
        assert!(config.key_path.is_none());
        assert!(!config.trust_on_first_use);
    }

    #[tokio::test]
    async fn missing_identity_file_fails_before_connecting() {
        let config = SessionConfig::new("127.0.0.1", "nobody")
            .port(1)
            .key_path("/nonexistent/berth/id_ed25519");
        let err = Session::connect(config).await.unwrap_err();
        assert!(matches!(err, Error::KeyLoadFailed { .. }), "got {err}");
    }
}
