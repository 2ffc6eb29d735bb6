// ABOUTME: Local Unix socket that relays each connection to a remote socket.
// ABOUTME: Every accepted stream gets its own direct-streamlocal SSH channel.

use super::client::SshHandler;
use super::error::{Error, Result};
use russh::client::Handle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running forwarder. Dropping it stops accepting and removes the socket.
pub struct ForwardHandle {
    local_path: PathBuf,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ForwardHandle {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Stop accepting connections and wait briefly for the accept loop to end.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take()
            && tokio::time::timeout(Duration::from_secs(2), task).await.is_err()
        {
            tracing::debug!(path = %self.local_path.display(), "forwarder did not stop in time");
        }
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let _ = std::fs::remove_file(&self.local_path);
    }
}

/// Bind a fresh socket under the temp dir and relay it to `remote_socket`.
pub(crate) async fn start_forward(
    handle: Arc<Handle<SshHandler>>,
    remote_socket: &str,
) -> Result<ForwardHandle> {
    let local_path = next_socket_path();
    let _ = std::fs::remove_file(&local_path);

    let listener = UnixListener::bind(&local_path).map_err(|e| {
        Error::SocketForwardFailed(format!("bind {}: {}", local_path.display(), e))
    })?;

    let (shutdown, stopped) = watch::channel(false);
    let task = tokio::spawn(accept_loop(
        listener,
        handle,
        remote_socket.to_string(),
        stopped,
    ));

    Ok(ForwardHandle {
        local_path,
        shutdown,
        task: Some(task),
    })
}

fn next_socket_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("berth-{}-{}.sock", std::process::id(), n))
}

async fn accept_loop(
    listener: UnixListener,
    handle: Arc<Handle<SshHandler>>,
    remote_socket: String,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stopped.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                let handle = Arc::clone(&handle);
                let remote_socket = remote_socket.clone();
                tokio::spawn(async move {
                    if let Err(e) = relay(stream, &handle, &remote_socket).await {
                        tracing::debug!("tunnel connection ended: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("accept on forwarded socket failed: {}", e);
                break;
            }
        }
    }
}

async fn relay(
    mut local: UnixStream,
    handle: &Handle<SshHandler>,
    remote_socket: &str,
) -> Result<()> {
    let channel = handle
        .channel_open_direct_streamlocal(remote_socket)
        .await
        .map_err(|e| {
            Error::SocketForwardFailed(format!("open channel to {}: {}", remote_socket, e))
        })?;

    let mut remote = channel.into_stream();
    let (sent, received) = tokio::io::copy_bidirectional(&mut local, &mut remote)
        .await
        .map_err(|e| Error::SocketForwardFailed(e.to_string()))?;
    tracing::trace!(sent, received, "tunnel connection closed");
    Ok(())
}
