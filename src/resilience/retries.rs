//! Bounded retry with a fixed delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// The last error seen once every attempt has failed.
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` up to `max_attempts` times (at least once), sleeping `delay`
/// between failed attempts. `op` receives the 1-based attempt number.
pub async fn retry_fixed<T, E, F, Fut>(max_attempts: u32, delay: Duration, mut op: F) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                return Err(RetriesExhausted {
                    attempts: attempt,
                    last_error: e,
                })
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts, delay = ?delay, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
