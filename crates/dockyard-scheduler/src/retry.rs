//! Fixed-delay retry for transient persistence failures.

use dockyard_config::RetryConfig;
use dockyard_core::Result;
use std::future::Future;
use tracing::warn;

/// Run `operation` until it succeeds or `policy.attempts` attempts have failed.
///
/// The last error is returned when every attempt fails.
pub async fn with_retry<T, F, Fut>(policy: RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
