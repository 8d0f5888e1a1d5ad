//! Detection loop driving the observers and the correlation engine
//!
//! One tick lists ReplicaSets, queries the error count, evaluates both and
//! forwards any new incident to the configured sinks. Ticks never overlap.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{DetectionConfig, DetectionLoop, DetectionLoopBuilder, TickOutcome};
