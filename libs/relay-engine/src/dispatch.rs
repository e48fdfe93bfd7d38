use std::sync::Arc;

use relay_api::{DeliveryOutcome, EnrichedEvent, TargetClient, TargetRequest};

use crate::rate_limit::RateLimiter;

/// Sends enriched events to the target under the shared rate limit.
pub struct TargetDispatcher {
    client: Arc<dyn TargetClient>,
    limiter: Arc<RateLimiter>,
}

impl TargetDispatcher {
    pub fn new(client: Arc<dyn TargetClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { client, limiter }
    }

    /// Never fails: transport errors become `RetryableFailure`.
    pub async fn dispatch(&self, enriched: &EnrichedEvent) -> DeliveryOutcome {
        self.limiter.acquire().await;

        let request = TargetRequest::from(enriched);
        match self.client.send(request).await {
            Ok(resp) => {
                let outcome = classify(resp.status, &resp.body);
                tracing::debug!(
                    event_id = %enriched.event_id,
                    correlation_id = %enriched.correlation_id,
                    status = resp.status,
                    success = outcome.is_success(),
                    "dispatched"
                );
                outcome
            }
            Err(e) => {
                tracing::debug!(event_id = %enriched.event_id, error = %e, "dispatch failed");
                DeliveryOutcome::RetryableFailure(e.message)
            }
        }
    }
}

/// Map a target response status to a delivery outcome.
pub fn classify(status: u16, body: &str) -> DeliveryOutcome {
    let reason = || {
        let body = body.trim();
        if body.is_empty() {
            format!("status {status}")
        } else {
            format!("status {status}: {}", truncate(body, 200))
        }
    };
    match status {
        200..=299 => DeliveryOutcome::Success,
        408 | 429 => DeliveryOutcome::RetryableFailure(reason()),
        400..=499 => DeliveryOutcome::PermanentFailure(reason()),
        500..=599 => DeliveryOutcome::RetryableFailure(reason()),
        _ => DeliveryOutcome::PermanentFailure(reason()),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
