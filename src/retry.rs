use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Run `operation` up to `max_attempts` times, sleeping `delay` between attempts
///
/// Used at startup, where the backend may still be coming up. Every failed
/// attempt except the last is logged at WARN; the last error is returned once
/// attempts are exhausted. `max_attempts` of zero is treated as one.
pub async fn retry_fixed<F, Fut, T, E>(
    what: &str,
    max_attempts: u32,
    delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "{} succeeded after retry", what);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %e,
                    "{} failed, retrying in {:?}",
                    what,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    attempts = max_attempts,
                    error = %e,
                    "{} failed, giving up",
                    what
                );
                return Err(e);
            }
        }
    }
}
