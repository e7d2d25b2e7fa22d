use std::time::Duration;

/// Await `fut`, logging a warning on the `performance` target if it took
/// longer than `max`. Used to wrap DB round-trips and provider calls that
/// should normally be fast but can stall under load.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
