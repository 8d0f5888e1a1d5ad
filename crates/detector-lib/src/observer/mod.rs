//! Pure observers over collaborator snapshots
//!
//! This module provides:
//! - Rollout revision selection from ReplicaSet metadata
//! - Error spike classification against a fixed threshold

mod log_spike;
mod rollout;

pub use log_spike::LogSpikeObserver;
pub use rollout::RolloutObserver;

use chrono::{DateTime, Utc};

/// Convert a configured window into a chrono duration, saturating on overflow
fn window_as_chrono(window: std::time::Duration) -> chrono::Duration {
    let secs = i64::try_from(window.as_secs())
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1000);
    chrono::Duration::seconds(secs)
}

/// Start of the window of length `window` ending at `now`, clamped to the
/// earliest representable time
pub(crate) fn window_start(now: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window_as_chrono(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
