use std::sync::Arc;

use serde::Serialize;

use relay_api::Event;

use crate::buffer::{MessageId, SourceBuffer};
use crate::rule::EventRule;

/// Result of offering an event to the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    Accepted {
        #[serde(serialize_with = "message_id_str")]
        message_id: MessageId,
    },
    /// The rule did not match; the event was dropped.
    Filtered,
}

fn message_id_str<S: serde::Serializer>(id: &MessageId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

/// Entry point for inbound events: rule filter in front of the buffer.
#[derive(Clone)]
pub struct Ingress {
    rule: Arc<EventRule>,
    buffer: Arc<SourceBuffer>,
}

impl Ingress {
    pub fn new(rule: EventRule, buffer: Arc<SourceBuffer>) -> Self {
        Self {
            rule: Arc::new(rule),
            buffer,
        }
    }

    pub fn accept(&self, event: Event) -> Admission {
        if !self.rule.matches(&event) {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, source = %event.source, "event filtered");
            return Admission::Filtered;
        }
        let event_id = event.id.clone();
        let message_id = self.buffer.send(event);
        tracing::debug!(event_id = %event_id, message_id = %message_id, "event accepted");
        Admission::Accepted { message_id }
    }

    pub fn accept_batch(&self, events: Vec<Event>) -> Vec<Admission> {
        events.into_iter().map(|e| self.accept(e)).collect()
    }
}
