// ABOUTME: Integration tests for engine adapters against a local daemon.
// ABOUTME: Skipped when neither Docker nor Podman is reachable.

#[macro_use]
mod support;

use berth::engine::{ContainerHandle, EngineErrorKind, RuntimeEngine};
use berth::spec::ContainerSpec;

fn busybox() -> ContainerSpec {
    ContainerSpec::new("busybox").with_tag("latest")
}

async fn cleanup(engine: &dyn RuntimeEngine, handle: &mut ContainerHandle) {
    if !handle.is_deleted() {
        let _ = engine.delete_container(handle).await;
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn run_logs_delete_scenario() {
    let engine = require_engine!(support::local_engine());

    let mut handle = engine.run(&busybox()).await.expect("run should succeed");
    assert!(!handle.id().is_empty());
    assert!(handle.is_started());
    assert!(!handle.is_deleted());

    engine.logs(&handle).await.expect("logs should succeed");

    let stale = handle.clone();
    engine
        .delete_container(&mut handle)
        .await
        .expect("delete should succeed");
    assert!(handle.is_deleted());

    let err = engine.logs(&handle).await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::ContainerNotFound);

    // The engine itself no longer knows the id either.
    let err = engine.logs(&stale).await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::ContainerNotFound, "got {err}");
}

#[tokio::test]
async fn stop_then_start() {
    let engine = require_engine!(support::local_engine());

    let spec = busybox().with_command(["sleep", "300"]);
    let mut handle = engine.run(&spec).await.expect("run should succeed");

    engine.stop(&mut handle).await.expect("stop should succeed");
    assert!(!handle.is_started());

    engine.start(&mut handle).await.expect("start should succeed");
    assert!(handle.is_started());
    assert!(!handle.is_deleted());

    engine
        .delete_container(&mut handle)
        .await
        .expect("delete of a running container should succeed");
    assert!(handle.is_deleted());
}

#[tokio::test]
async fn delete_marks_deleted_even_when_stopped() {
    let engine = require_engine!(support::local_engine());

    let spec = busybox().with_command(["sleep", "300"]);
    let mut handle = engine.run(&spec).await.expect("run should succeed");
    engine.stop(&mut handle).await.expect("stop should succeed");

    engine
        .delete_container(&mut handle)
        .await
        .expect("delete should succeed");
    assert!(handle.is_deleted());

    let err = engine.start(&mut handle).await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::ContainerNotFound);
}

#[tokio::test]
async fn attached_run_waits_for_output() {
    let engine = require_engine!(support::local_engine());

    let spec = busybox()
        .with_env("GREETING", "hello from berth")
        .with_command(["sh", "-c", "echo $GREETING; echo err >&2"])
        .with_detached(false);
    let mut handle = engine.run(&spec).await.expect("run should succeed");
    assert!(handle.is_started());

    let logs = engine.logs(&handle).await.expect("logs should succeed");
    assert!(logs.contains("hello from berth"), "logs were: {logs:?}");
    assert!(logs.contains("err"), "stderr missing from logs: {logs:?}");

    cleanup(engine.as_ref(), &mut handle).await;
}

#[tokio::test]
async fn entrypoint_is_split_into_words() {
    let engine = require_engine!(support::local_engine());

    let spec = busybox()
        .with_entrypoint("echo entry")
        .with_command(["point"])
        .with_detached(false);
    let mut handle = engine.run(&spec).await.expect("run should succeed");

    let logs = engine.logs(&handle).await.expect("logs should succeed");
    assert_eq!(logs.trim(), "entry point");

    cleanup(engine.as_ref(), &mut handle).await;
}

#[tokio::test]
async fn volume_is_mounted() {
    let engine = require_engine!(support::local_engine());

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "mounted").unwrap();
    let host = dir.path().to_str().unwrap().to_string();

    let mut spec = busybox()
        .with_command(["cat", "/data/marker.txt"])
        .with_detached(false);
    spec.attach_volume(host, "/data", Some("ro"));

    let mut handle = engine.run(&spec).await.expect("run should succeed");
    let logs = engine.logs(&handle).await.expect("logs should succeed");
    assert_eq!(logs.trim(), "mounted");

    cleanup(engine.as_ref(), &mut handle).await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn missing_image_fails_to_pull() {
    let engine = require_engine!(support::local_engine());

    let spec = ContainerSpec::new("berth-test/definitely-not-an-image").with_tag("nope");
    let err = engine.run(&spec).await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::ImagePullFailed, "got {err}");
}

#[tokio::test]
async fn invalid_spec_is_rejected_before_contacting_engine() {
    let engine = require_engine!(support::local_engine());

    let err = engine.run(&ContainerSpec::new("")).await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::InvalidSpec);
}

#[tokio::test]
async fn closed_engine_is_unavailable() {
    let engine = require_engine!(support::local_engine());

    engine.ping().await.expect("ping should succeed");
    engine.close().await.expect("close should succeed");
    engine.close().await.expect("second close should succeed");

    let err = engine.run(&busybox()).await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::EngineUnavailable);
    let err = engine.ping().await.unwrap_err();
    assert_eq!(err.kind(), EngineErrorKind::EngineUnavailable);
}
