//! Shared fixtures for the `trainflow` integration tests.

pub mod builders;
pub mod clock;
pub mod handlers;

use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Output is captured by the harness and shown for failing tests only.
/// `RUST_LOG=trainflow::engine=debug` narrows it to the engine.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Fail the test if `f` has not resolved within 5 seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test future did not resolve within 5 seconds")
}

/// Poll `cond` every 10ms until it holds or 5 seconds pass.
pub async fn eventually<F>(what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within 5 seconds: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
