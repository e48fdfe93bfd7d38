use std::time::Duration;

use tokio::time::Instant;

use relay_api::RelayError;

use crate::buffer::Message;
use crate::config::PipeConfig;

/// Retry budget and exponential backoff. Pure computation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retry_count: u32,
    /// Total budget measured from the first receipt.
    pub retry_period: Duration,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipeConfig) -> Self {
        Self {
            max_retry_count: config.max_retry_count,
            retry_period: config.retry_period(),
            base_delay: config.retry_base_delay(),
        }
    }

    /// `base × 2^(receive_count − 1)`, saturating, capped at the retry period.
    pub fn next_delay(&self, receive_count: u32) -> Duration {
        let exp = receive_count.saturating_sub(1);
        let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.retry_period)
    }

    /// Backoff for the next redelivery of `message`, never beyond the
    /// remaining retry budget.
    pub fn delay_for(&self, message: &Message, now: Instant) -> Duration {
        let remaining = self.retry_period.saturating_sub(elapsed(message, now));
        self.next_delay(message.receive_count).min(remaining)
    }

    /// True once no further attempt may follow the current one.
    pub fn is_exhausted(&self, message: &Message, now: Instant) -> bool {
        message.receive_count > self.max_retry_count || elapsed(message, now) > self.retry_period
    }

    /// Whether `message` may be attempted at all. Messages redelivered by
    /// lease expiry can overrun the count without ever reaching a failure
    /// transition; those go straight to the dead-letter path.
    pub fn admits_attempt(&self, message: &Message, now: Instant) -> bool {
        message.receive_count <= self.max_retry_count.saturating_add(1)
            && elapsed(message, now) <= self.retry_period
    }

    /// Terminal error for a message whose budget is spent, naming which
    /// limit was hit and the last failure.
    pub fn exhausted(&self, message: &Message, now: Instant, last_reason: &str) -> RelayError {
        let why = if message.receive_count > self.max_retry_count && elapsed(message, now) <= self.retry_period {
            format!("retry budget exhausted after {} attempts", message.receive_count)
        } else {
            format!(
                "retry period of {:?} elapsed after {} attempts",
                self.retry_period, message.receive_count
            )
        };
        RelayError::exhausted(format!("{why}: {last_reason}"))
    }
}

fn elapsed(message: &Message, now: Instant) -> Duration {
    now.saturating_duration_since(message.first_received_at)
}
