// ABOUTME: Integration tests for Podman reached through an SSH tunnel.
// ABOUTME: Run with BERTH_TEST_REMOTE_URI=ssh://user@host/path/podman.sock.

#[macro_use]
mod support;

use berth::engine::{EngineErrorKind, EngineKind};
use berth::spec::ContainerSpec;

#[test_group::group(podman)]
#[tokio::test]
async fn remote_lifecycle() {
    let engine = require_engine!(support::remote_engine());
    assert_eq!(engine.kind(), EngineKind::Podman);

    let spec = ContainerSpec::new("busybox")
        .with_command(["sh", "-c", "echo one; echo two"])
        .with_detached(false);
    let mut handle = engine.run(&spec).await.expect("run should succeed");
    assert!(handle.is_started());

    // Multiplexed podman log chunks are joined with nothing in between.
    let logs = engine.logs(&handle).await.expect("logs should succeed");
    assert_eq!(logs, "one\ntwo\n");

    engine
        .delete_container(&mut handle)
        .await
        .expect("delete should succeed");
    assert!(handle.is_deleted());

    engine.close().await.expect("close should tear down the tunnel");
}

#[test_group::group(podman)]
#[tokio::test]
async fn closed_tunnel_is_unavailable() {
    let engine = require_engine!(support::remote_engine());

    engine.close().await.expect("close should succeed");
    let err = engine.ping().await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::EngineUnavailable);
}
