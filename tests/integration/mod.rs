//! Integration tests for the ringctl orchestrator.
//!
//! These tests wire a full engine through `OrchestratorBuilder` with an
//! in-memory task store and the scripted node agent from `test_harness`, then
//! let the plan driver advance runs on its own. They require the
//! `test-harness` feature:
//!
//! ```bash
//! cargo test --features test-harness
//! ```
//!
//! - **run_lifecycle**: start, stop, restart and restore of maintenance runs
//! - **fleet_queries**: fan-out queries served while runs are in flight

pub mod fleet_queries;
pub mod run_lifecycle;

use tokio::time::Instant;

pub async fn poll_until<T, F, Fut>(
    timeout: std::time::Duration,
    interval: std::time::Duration,
    mut check: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }

        if Instant::now() >= deadline {
            return None;
        }

        tokio::time::sleep(interval).await;
    }
}
