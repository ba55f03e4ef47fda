pub mod datetime;

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Repeatedly runs `probe` every `interval` until `done` accepts an observed
/// value or `wait` elapses.
///
/// Returns `Ok(value)` with the accepted observation, or `Err(last)` with the
/// last value observed before the deadline (`None` if nothing ever answered).
/// The probe runs at least once unless `wait` is zero.
pub async fn poll_until<T, F, Fut, D>(
    wait: Duration,
    interval: Duration,
    mut probe: F,
    done: D,
) -> std::result::Result<T, Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
    D: Fn(&T) -> bool,
{
    let deadline = Instant::now() + wait;
    let mut last = None;
    while Instant::now() < deadline {
        if let Some(value) = probe().await {
            if done(&value) {
                return Ok(value);
            }
            last = Some(value);
        }
        sleep(interval).await;
    }
    Err(last)
}
