//! Bounded retry with exponential backoff.
//!
//! Retries live at call sites, never buried inside transport wrappers; the
//! caller decides which error kinds are worth another attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Policy for node sync calls.
    pub const fn transport() -> Self {
        Self::new(4, Duration::from_millis(250), Duration::from_secs(2))
    }

    /// Policy for template build status probes.
    pub const fn build_probe() -> Self {
        Self::new(10, Duration::from_millis(100), Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, the attempt budget runs out, or it fails with
/// an error `should_retry` rejects. The op receives the zero-based attempt
/// number.
pub async fn retry<T, F, Fut, P>(policy: RetryPolicy, should_retry: P, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.attempts || !should_retry(&err) {
                    return Err(err);
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}
