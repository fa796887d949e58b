//! Wall-clock timing guard

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Await `fut`, logging how long it took.
///
/// Durations above `threshold` are reported at warn level, everything else
/// at debug level. The output of `fut` is returned untouched.
pub async fn timed<F>(label: &str, threshold: Option<Duration>, fut: F) -> F::Output
where
    F: Future,
{
    let start = Instant::now();
    let output = fut.await;
    let elapsed = start.elapsed();

    match threshold {
        Some(limit) if elapsed > limit => log::warn!(
            "'{}' took {:.2}s (threshold: {:.2}s)",
            label,
            elapsed.as_secs_f64(),
            limit.as_secs_f64()
        ),
        _ => log::debug!("'{}' took {:.2}s", label, elapsed.as_secs_f64()),
    }

    output
}
