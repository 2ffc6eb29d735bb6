// ABOUTME: Shared helpers for berth integration tests.
// ABOUTME: Tracing setup and skip-when-no-engine connection helpers.

use berth::RuntimeEngine;
use berth::config::{EngineConfig, RemoteConfig};
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Environment variable naming a remote podman to test against.
#[allow(dead_code)]
pub const REMOTE_URI_VAR: &str = "BERTH_TEST_REMOTE_URI";

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("berth=debug".parse().unwrap())
            .add_directive("russh=info".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Connect to whatever engine the environment provides.
#[allow(dead_code)]
pub async fn local_engine() -> Option<Box<dyn RuntimeEngine>> {
    init_tracing();
    berth::connect_from_env().await.ok()
}

/// Connect to the remote podman named by [`REMOTE_URI_VAR`], if any.
#[allow(dead_code)]
pub async fn remote_engine() -> Option<Box<dyn RuntimeEngine>> {
    init_tracing();
    let uri = std::env::var(REMOTE_URI_VAR).ok()?;
    let mut remote = RemoteConfig::new(uri);
    remote.identity = std::env::var("BERTH_TEST_IDENTITY").ok().map(Into::into);
    remote.trust_on_first_use = true;
    let config = EngineConfig {
        remote: Some(remote),
        ..Default::default()
    };
    Some(
        berth::connect(&config)
            .await
            .expect("remote engine named by BERTH_TEST_REMOTE_URI should connect"),
    )
}

/// Skip the test when no engine is reachable.
#[allow(unused_macros)]
macro_rules! require_engine {
    ($connect:expr) => {
        match $connect.await {
            Some(engine) => engine,
            None => {
                eprintln!("Skipping test: no container engine available");
                return;
            }
        }
    };
}
