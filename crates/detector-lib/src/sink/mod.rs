//! Incident emission
//!
//! Sinks receive each incident once, after the correlation engine has
//! already recorded it. Delivery is best-effort: a failed sink is logged and
//! never retried.

mod slack;
mod stdout;

pub use slack::{format_slack_message, SlackNotifier, SlackPayload};
pub use stdout::JsonLineSink;

use crate::error::SinkError;
use crate::models::IncidentRecord;

pub use async_trait::async_trait;

/// Destination for emitted incidents
#[async_trait]
pub trait IncidentSink: Send + Sync {
    /// Short name used in logs, metrics and status
    fn name(&self) -> &'static str;

    /// Deliver a single incident
    async fn deliver(&self, incident: &IncidentRecord) -> Result<(), SinkError>;
}
