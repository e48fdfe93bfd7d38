use std::sync::Arc;

use relay_api::{Clock, DeadLetterEntry, DeadLetterSink, Event, RelayError};

/// Writes terminal failures to the dead-letter sink.
pub struct DeadLetterRouter {
    sink: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterRouter {
    pub fn new(sink: Arc<dyn DeadLetterSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Persist the event with its final receive count and failure reason.
    /// Safe to repeat for the same event; the sink keeps one entry per id.
    pub async fn dead_letter(&self, event: &Event, receive_count: u32, reason: &str) -> Result<(), RelayError> {
        let entry = DeadLetterEntry {
            event: event.clone(),
            receive_count,
            reason: reason.to_string(),
            dead_lettered_at_ms: self.clock.now_ms(),
        };
        self.sink
            .append(entry)
            .await
            .map_err(|e| e.with_context(format!("dead-letter '{}'", event.id)))?;
        tracing::warn!(event_id = %event.id, receive_count, reason, "event dead-lettered");
        Ok(())
    }
}
