//! Bounded retry with a fixed interval between attempts.

use log::debug;
use std::future::Future;
use std::time::Duration;

/// Runs `op` up to `max_attempts` times, sleeping `delay` between attempts.
/// Returns the first success or the error of the final attempt.
pub(crate) async fn retry<T, E, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                debug!("attempt {attempt}/{max_attempts} failed: {e}");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
