//! Bounded retry with exponential backoff for remote calls.
//!
//! The decision to retry is a pure function of the error kind
//! (`SyncError::is_transient`), never of exception inspection. Each attempt
//! carries its own timeout; exhausted retries surface as `TransferFailed`
//! naming the key, the operation, and the root cause.

use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{SyncError, SyncResult};

/// Runs `op` under the retry policy, backing off between transient failures.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    key: &str,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let timeout = std::time::Duration::from_secs(policy.timeout_secs);
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::Transient(format!(
                "{operation} for {key} timed out after {}s",
                policy.timeout_secs
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!("{operation} for {key} failed transiently, retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(SyncError::TransferFailed {
                    key: key.to_string(),
                    operation,
                    attempts: attempt + 1,
                    cause: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}
