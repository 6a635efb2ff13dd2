//! Shared helpers for taskdag's integration tests.
//!
//! - [`builders`]: declare graphs with named keys instead of Rust types.
//! - [`fake_job`]: scripted engine jobs that record what ran and when.
//! - [`recording`]: an emitter that keeps every lifecycle event.

pub mod builders;
pub mod fake_job;
pub mod recording;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// How long an engine test may take before it is considered hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-captured tracing subscriber once per test binary.
///
/// Output only shows up for failing tests unless run with `--nocapture`.
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=taskdag::engine=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,taskdag=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `fut`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    with_timeout_of(TEST_TIMEOUT, fut).await
}

pub async fn with_timeout_of<F, T>(limit: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(out) => out,
        Err(_) => panic!("test did not finish within {limit:?}"),
    }
}
