//! Single-line JSON incident writer

use std::io::Write;
use std::sync::Mutex;

use super::{async_trait, IncidentSink};
use crate::error::SinkError;
use crate::models::IncidentRecord;

/// Writes one JSON object per line and flushes after each incident
pub struct JsonLineSink<W> {
    writer: Mutex<W>,
}

impl JsonLineSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl<W: Write + Send> IncidentSink for JsonLineSink<W> {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn deliver(&self, incident: &IncidentRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(incident)?;

        let mut writer = self.writer.lock().map_err(|_| SinkError::Delivery {
            sink: "stdout",
            message: "writer lock poisoned".to_string(),
        })?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}
