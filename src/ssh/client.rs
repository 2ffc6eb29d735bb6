// ABOUTME: SSH session used to tunnel a remote engine socket, via russh.
// ABOUTME: Key file, agent, or default-key auth with known_hosts checking.

use super::error::{Error, Result};
use super::forward::{self, ForwardHandle};
use parking_lot::Mutex;
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

/// Settings for one SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key file. When absent the SSH agent is tried, then
    /// `~/.ssh/id_ed25519`, `id_rsa` and `id_ecdsa`.
    pub key_path: Option<PathBuf>,
    /// Accept (and record) a host key that known_hosts does not have yet.
    pub trust_on_first_use: bool,
    /// known_hosts file; `~/.ssh/known_hosts` when absent.
    pub known_hosts_path: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
            trust_on_first_use: false,
            known_hosts_path: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }
}

/// Host key verification for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn from_config(config: &SessionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }

    fn learn(&self, key: &ssh_key::PublicKey) {
        let learned = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!("failed to record host key for {}: {}", self.host, e);
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let known = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match known {
            Ok(true) => Ok(true),
            // A changed key is never accepted, even with trust-on-first-use.
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!("host key for {}:{} has changed", self.host, self.port);
                Ok(false)
            }
            Ok(false) | Err(_) if self.trust_on_first_use => {
                tracing::warn!(
                    "trust-on-first-use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                self.learn(server_public_key);
                Ok(true)
            }
            Ok(false) | Err(_) => Ok(false),
        }
    }
}

enum AuthMethod {
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

/// An authenticated SSH session and the socket tunnels running over it.
pub struct Session {
    config: SessionConfig,
    handle: Arc<Handle<SshHandler>>,
    forwarders: Mutex<Vec<ForwardHandle>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("forwarders", &self.forwarders.lock().len())
            .finish()
    }
}

impl Session {
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let auth_method = resolve_auth_method(&config).await?;

        let russh_config = Config {
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        let mut handle = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            SshHandler::from_config(&config),
        )
        .await
        .map_err(|e| Error::Connection(format!("{}:{}: {}", config.host, config.port, e)))?;

        if !authenticate(&mut handle, &config.user, auth_method).await? {
            return Err(Error::AuthenticationFailed);
        }
        tracing::debug!(host = %config.host, user = %config.user, "SSH session established");

        Ok(Self {
            config,
            handle: Arc::new(handle),
            forwarders: Mutex::new(Vec::new()),
        })
    }

    /// Forward a fresh local Unix socket to `remote_socket` on the far side.
    /// Returns the local socket path; it lives until the session disconnects.
    pub async fn forward_socket(&self, remote_socket: &str) -> Result<String> {
        let forwarder = forward::start_forward(Arc::clone(&self.handle), remote_socket).await?;
        let path = forwarder
            .local_path()
            .to_str()
            .ok_or_else(|| {
                Error::SocketForwardFailed("socket path is not valid UTF-8".to_string())
            })?
            .to_string();
        self.forwarders.lock().push(forwarder);
        Ok(path)
    }

    /// Stop every forwarder, then end the session.
    pub async fn disconnect(self) -> Result<()> {
        // Drain first so the lock is released before awaiting.
        let forwarders: Vec<_> = self.forwarders.lock().drain(..).collect();
        for forwarder in forwarders {
            forwarder.stop().await;
        }

        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}

async fn resolve_auth_method(config: &SessionConfig) -> Result<AuthMethod> {
    if let Some(key_path) = &config.key_path {
        let key = load_secret_key(key_path, None).map_err(|e| Error::KeyLoadFailed {
            path: key_path.clone(),
            reason: e.to_string(),
        })?;
        return Ok(AuthMethod::KeyFile(Arc::new(key)));
    }

    if let Ok(agent) = AgentClient::connect_env().await {
        return Ok(AuthMethod::Agent(agent));
    }

    let home = std::env::var("HOME").map_err(|_| {
        Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
    })?;

    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .iter()
        .find_map(|name| load_secret_key(format!("{}/.ssh/{}", home, name), None).ok())
        .map(|key| AuthMethod::KeyFile(Arc::new(key)))
        .ok_or_else(|| {
            Error::AgentUnavailable("SSH agent not available and no default keys found".to_string())
        })
}

async fn authenticate(
    handle: &mut Handle<SshHandler>,
    user: &str,
    auth_method: AuthMethod,
) -> Result<bool> {
    match auth_method {
        AuthMethod::Agent(mut agent) => {
            let keys = agent.request_identities().await.map_err(|e| {
                Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
            })?;
            if keys.is_empty() {
                return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
            }

            for key in keys {
                match handle
                    .authenticate_publickey_with(user, key, None, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(true),
                    _ => continue,
                }
            }
            Ok(false)
        }
        AuthMethod::KeyFile(key) => {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(Error::Protocol)?
                .flatten();

            let result = handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await
                .map_err(Error::Protocol)?;
            Ok(result.success())
        }
    }
}
