use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Result of one dispatch attempt. Drives the orchestrator's next transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Transient downstream condition (5xx, timeout, connection error).
    RetryableFailure(String),
    /// Client or validation error reported by the target.
    PermanentFailure(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }
}

/// Terminal record of a message that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub event: Event,
    /// Receive count of the final attempt.
    pub receive_count: u32,
    /// Last failure reason.
    pub reason: String,
    /// When the entry was written, Unix milliseconds.
    pub dead_lettered_at_ms: i64,
}
