//! Error spike classification
//!
//! Classifies the error line count of a trailing window against a fixed
//! threshold. The count itself comes from the log backend.

use std::num::NonZeroU64;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::window_start;
use crate::models::LogSpikeObservation;

/// Default measurement window (2 minutes)
const DEFAULT_ERROR_WINDOW_SECS: u64 = 2 * 60;

/// Classifies error counts against a threshold
#[derive(Debug, Clone)]
pub struct LogSpikeObserver {
    /// Minimum error count that counts as a spike
    pub threshold: NonZeroU64,
    /// Trailing window the error count covers
    pub window: Duration,
}

impl LogSpikeObserver {
    /// Create an observer with the default 2-minute window
    pub fn new(threshold: NonZeroU64) -> Self {
        Self {
            threshold,
            window: Duration::from_secs(DEFAULT_ERROR_WINDOW_SECS),
        }
    }

    /// Set custom measurement window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Inclusive threshold check
    pub fn classify(error_count: u64, threshold: NonZeroU64) -> bool {
        error_count >= threshold.get()
    }

    /// Start and end of the window ending at `now`
    pub fn window_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (window_start(now, self.window), now)
    }

    /// Build the observation for an error count measured up to `now`
    pub fn observe_error_spike(&self, error_count: u64, now: DateTime<Utc>) -> LogSpikeObservation {
        let (window_start, window_end) = self.window_bounds(now);
        LogSpikeObservation {
            window_start,
            window_end,
            error_count,
            threshold: self.threshold.get(),
            threshold_exceeded: Self::classify(error_count, self.threshold),
        }
    }
}
