//! Run metrics derived from timestamps and download counters

use chrono::{DateTime, Utc};

/// Seconds spent running. Queued time is excluded: a run that never
/// started reports zero, and an unfinished run is measured up to `now`.
pub fn compute_runtime_secs(
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let Some(started_at) = started_at else {
        return 0.0;
    };
    let end = finished_at.unwrap_or(now);
    let micros = (end - started_at).num_microseconds().unwrap_or(i64::MAX);
    (micros as f64 / 1_000_000.0).max(0.0)
}

/// Items handled per second; zero when no time has elapsed.
pub fn compute_avg_speed(
    images_downloaded: usize,
    videos_downloaded: usize,
    skipped_duplicate: usize,
    runtime_secs: f64,
) -> f64 {
    if runtime_secs <= 0.0 {
        return 0.0;
    }
    (images_downloaded + videos_downloaded + skipped_duplicate) as f64 / runtime_secs
}
