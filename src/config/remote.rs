// ABOUTME: Remote engine settings for Podman reached over SSH.
// ABOUTME: Parses ssh://[user@]host[:port]/socket URIs into session settings.

use crate::error::{Error, Result};
use crate::ssh::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// `ssh://[user@]host[:port]/path/to/podman.sock`
    pub uri: String,

    /// Private key to authenticate with. Falls back to the SSH agent, then
    /// the default key files, when absent.
    #[serde(default)]
    pub identity: Option<PathBuf>,

    /// Accept and record host keys that are not yet in known_hosts.
    #[serde(default)]
    pub trust_on_first_use: bool,

    /// known_hosts file to check against instead of ~/.ssh/known_hosts.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

/// The pieces of a remote URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    /// Engine socket path on the remote host.
    pub socket: String,
}

impl RemoteTarget {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRemoteUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = uri
            .trim()
            .strip_prefix("ssh://")
            .ok_or_else(|| invalid("scheme must be ssh://"))?;

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => return Err(invalid("missing remote socket path")),
        };
        if path.len() < 2 {
            return Err(invalid("missing remote socket path"));
        }

        let (user, host_port) = match authority.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some(_) => return Err(invalid("user cannot be empty")),
            None => (default_user(), authority),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid(&format!("invalid port: {}", port)))?;
                (host, port)
            }
            None => (host_port, 22),
        };

        if host.is_empty() {
            return Err(invalid("hostname cannot be empty"));
        }

        Ok(Self {
            user,
            host: host.to_string(),
            port,
            socket: path.to_string(),
        })
    }
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

/// Expand a leading `~/` to `$HOME/`.
fn expand_home(path: &std::path::Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var("HOME")) {
        (Ok(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

impl RemoteConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            identity: None,
            trust_on_first_use: false,
            known_hosts: None,
        }
    }

    pub fn target(&self) -> Result<RemoteTarget> {
        RemoteTarget::parse(&self.uri)
    }

    /// SSH session settings for reaching `target`.
    pub fn session_config(&self, target: &RemoteTarget) -> SessionConfig {
        let mut config = SessionConfig::new(&target.host, &target.user)
            .port(target.port)
            .trust_on_first_use(self.trust_on_first_use);
        if let Some(identity) = &self.identity {
            config = config.key_path(expand_home(identity));
        }
        if let Some(known_hosts) = &self.known_hosts {
            config = config.known_hosts_path(expand_home(known_hosts));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expands_to_home() {
        temp_env::with_var("HOME", Some("/home/ci"), || {
            assert_eq!(
                expand_home(std::path::Path::new("~/.ssh/id_ed25519")),
                PathBuf::from("/home/ci/.ssh/id_ed25519")
            );
            assert_eq!(
                expand_home(std::path::Path::new("/etc/key")),
                PathBuf::from("/etc/key")
            );
        });
    }

    #[test]
    fn user_defaults_from_environment() {
        temp_env::with_var("USER", Some("builder"), || {
            let target = RemoteTarget::parse("ssh://host/run/podman/podman.sock").unwrap();
            assert_eq!(target.user, "builder");
            assert_eq!(target.port, 22);
        });
    }
}
