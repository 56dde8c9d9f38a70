//! Retry with a fixed back-off schedule and jitter.
//!
//! The fetch strategy selector retries transient failures on the same
//! strategy; everything else (escalation, permanent failures, cancellation)
//! is returned to the caller on the first occurrence.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Delay before each retry of a transient fetch failure.
pub const FETCH_BACKOFF_MS: [u64; 2] = [300, 900];

/// Delay before retry number `retry` (1-based). Past the end of `schedule_ms`
/// the last entry repeats. Each delay is jittered by ±25%.
pub(crate) fn backoff_delay(schedule_ms: &[u64], retry: u32) -> Duration {
    let index = usize::try_from(retry.saturating_sub(1)).unwrap_or(usize::MAX);
    let base = schedule_ms
        .get(index)
        .or_else(|| schedule_ms.last())
        .copied()
        .unwrap_or(0);
    if base == 0 {
        return Duration::ZERO;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (base as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(delay_ms)
}

/// Runs `operation` with up to `max_retries` additional attempts while
/// `is_retriable` holds for the returned error.
pub(crate) async fn retry_with_backoff<T, E, F, Fut>(
    max_retries: u32,
    schedule_ms: &[u64],
    is_retriable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || retry >= max_retries {
                    return Err(err);
                }
                retry += 1;
                let delay = backoff_delay(schedule_ms, retry);
                tracing::warn!(
                    retry,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient fetch failure, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
