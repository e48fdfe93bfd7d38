use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_api::{DeliveryOutcome, EnrichedEvent, ErrorKind, RelayError};

use crate::buffer::{Message, SourceBuffer};
use crate::config::{AbsentPolicy, PermanentFailurePolicy, PipeConfig};
use crate::dead_letter::DeadLetterRouter;
use crate::dispatch::TargetDispatcher;
use crate::enrich::{EnrichmentResolver, Resolution};
use crate::retry::RetryPolicy;

/// Poll interval of an idle worker when the batching window is zero.
const IDLE_POLL: Duration = Duration::from_millis(100);

// ═══════════════════════════════════════════════════════════════
//  States and counters
// ═══════════════════════════════════════════════════════════════

/// Per-message lifecycle within one lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Received,
    Enriching,
    Dispatching,
    /// Delivered and removed from the buffer.
    Acknowledged,
    /// Released with backoff for another attempt.
    Retrying,
    /// Written to the dead-letter sink and removed from the buffer.
    DeadLettered,
    /// Lease deadline hit mid-attempt; the message reappears on expiry.
    Abandoned,
}

#[derive(Debug, Default)]
pub struct PipeStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    acknowledged: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipeStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub acknowledged: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
}

impl PipeStats {
    pub fn snapshot(&self) -> PipeStatsSnapshot {
        PipeStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn record(&self, state: MessageState) {
        let counter = match state {
            MessageState::Received => &self.received,
            MessageState::Dispatching => &self.dispatched,
            MessageState::Acknowledged => &self.acknowledged,
            MessageState::Retrying => &self.retried,
            MessageState::DeadLettered => &self.dead_lettered,
            MessageState::Abandoned => &self.abandoned,
            MessageState::Enriching => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Orchestrator
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct PipeSettings {
    pub retry: RetryPolicy,
    pub absent_policy: AbsentPolicy,
    pub permanent_failure_policy: PermanentFailurePolicy,
    pub batch_size: usize,
    pub batching_window: Duration,
}

impl PipeSettings {
    pub fn from_config(config: &PipeConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            absent_policy: config.absent_policy,
            permanent_failure_policy: config.permanent_failure_policy,
            batch_size: config.source_batch_size,
            batching_window: config.batching_window(),
        }
    }
}

/// Result of the enrich + dispatch part of one attempt.
enum Attempt {
    Delivered,
    Failed {
        reason: String,
        /// Skip the retry budget and dead-letter right away.
        terminal: bool,
    },
}

/// Drives messages from the buffer through enrichment and dispatch, and
/// decides acknowledge / retry / dead-letter from the outcome.
pub struct PipeOrchestrator {
    buffer: Arc<SourceBuffer>,
    resolver: EnrichmentResolver,
    dispatcher: TargetDispatcher,
    dead_letters: DeadLetterRouter,
    settings: PipeSettings,
    stats: Arc<PipeStats>,
}

impl PipeOrchestrator {
    pub fn new(
        buffer: Arc<SourceBuffer>,
        resolver: EnrichmentResolver,
        dispatcher: TargetDispatcher,
        dead_letters: DeadLetterRouter,
        settings: PipeSettings,
    ) -> Self {
        Self {
            buffer,
            resolver,
            dispatcher,
            dead_letters,
            settings,
            stats: Arc::new(PipeStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<PipeStats> {
        &self.stats
    }

    /// Batch loop of one worker. Returns once `token` is cancelled; messages
    /// still in flight are dropped and become visible again on lease expiry.
    pub async fn run_worker(self: Arc<Self>, worker: usize, token: CancellationToken) {
        tracing::info!(worker, "pipe worker started");
        loop {
            let batch = tokio::select! {
                batch = self.buffer.receive_batch(self.settings.batch_size, self.settings.batching_window) => batch,
                _ = token.cancelled() => break,
            };

            if batch.is_empty() && self.settings.batching_window.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => continue,
                    _ = token.cancelled() => break,
                }
            }

            // Messages of one batch share the lease clock, so they run side by
            // side and queue at the rate limiter instead of behind each other.
            let mut in_flight = JoinSet::new();
            for message in batch {
                let this = self.clone();
                in_flight.spawn(async move { this.process(&message).await });
            }
            loop {
                tokio::select! {
                    joined = in_flight.join_next() => match joined {
                        Some(Ok(_)) => {}
                        Some(Err(e)) if e.is_cancelled() => {}
                        Some(Err(e)) => tracing::error!(worker, error = %e, "message task failed"),
                        None => break,
                    },
                    _ = token.cancelled() => {
                        in_flight.abort_all();
                        while in_flight.join_next().await.is_some() {}
                        break;
                    }
                }
            }
            if token.is_cancelled() {
                break;
            }
        }
        tracing::info!(worker, "pipe worker stopped");
    }

    /// Take one leased message to its next resting state.
    pub async fn process(&self, message: &Message) -> MessageState {
        self.transition(message, MessageState::Received);

        let now = Instant::now();
        if !self.settings.retry.admits_attempt(message, now) {
            let err = self
                .settings
                .retry
                .exhausted(message, now, "earlier leases expired before an attempt finished");
            return self.exhaust(message, err).await;
        }

        let attempt = tokio::time::timeout_at(message.lease_expires_at, self.attempt(message)).await;
        match attempt {
            Ok(Attempt::Delivered) => {
                self.buffer.acknowledge(&message.receipt);
                self.transition(message, MessageState::Acknowledged)
            }
            Ok(Attempt::Failed { reason, terminal }) => self.fail(message, reason, terminal).await,
            Err(_) => {
                tracing::warn!(
                    message_id = %message.id,
                    event_id = %message.event.id,
                    receive_count = message.receive_count,
                    "lease expired during attempt, abandoning"
                );
                self.transition(message, MessageState::Abandoned)
            }
        }
    }

    async fn attempt(&self, message: &Message) -> Attempt {
        self.transition(message, MessageState::Enriching);
        let enriched = match self.resolver.resolve(&message.event).await {
            Ok(Resolution::Enriched(enriched)) => enriched,
            Ok(Resolution::Absent { correlation_id }) => {
                match self.absent(message, correlation_id) {
                    Ok(enriched) => enriched,
                    Err(failed) => return failed,
                }
            }
            Err(e) => {
                let terminal = e.kind == ErrorKind::Permanent
                    && self.settings.permanent_failure_policy == PermanentFailurePolicy::DeadLetter;
                return Attempt::Failed {
                    reason: e.message,
                    terminal,
                };
            }
        };

        self.transition(message, MessageState::Dispatching);
        match self.dispatcher.dispatch(&enriched).await {
            DeliveryOutcome::Success => Attempt::Delivered,
            DeliveryOutcome::RetryableFailure(reason) => Attempt::Failed {
                reason,
                terminal: false,
            },
            DeliveryOutcome::PermanentFailure(reason) => Attempt::Failed {
                reason,
                terminal: self.settings.permanent_failure_policy == PermanentFailurePolicy::DeadLetter,
            },
        }
    }

    fn absent(&self, message: &Message, correlation_id: String) -> Result<EnrichedEvent, Attempt> {
        let reason = format!("enrichment record not found for '{correlation_id}'");
        match self.settings.absent_policy {
            AbsentPolicy::DispatchEmpty => Ok(self.resolver.empty(&message.event, correlation_id)),
            AbsentPolicy::Retry => Err(Attempt::Failed {
                reason,
                terminal: false,
            }),
            AbsentPolicy::DeadLetter => Err(Attempt::Failed { reason, terminal: true }),
        }
    }

    async fn fail(&self, message: &Message, reason: String, terminal: bool) -> MessageState {
        let now = Instant::now();
        if terminal {
            return self.dead_letter(message, &reason).await;
        }
        if self.settings.retry.is_exhausted(message, now) {
            let err = self.settings.retry.exhausted(message, now, &reason);
            return self.exhaust(message, err).await;
        }

        let delay = self.settings.retry.delay_for(message, now);
        tracing::info!(
            message_id = %message.id,
            event_id = %message.event.id,
            receive_count = message.receive_count,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "attempt failed, retrying"
        );
        self.buffer.release_after(&message.receipt, delay);
        self.transition(message, MessageState::Retrying)
    }

    async fn exhaust(&self, message: &Message, err: RelayError) -> MessageState {
        tracing::warn!(
            message_id = %message.id,
            event_id = %message.event.id,
            receive_count = message.receive_count,
            error = %err,
            "giving up on message"
        );
        self.dead_letter(message, &err.message).await
    }

    async fn dead_letter(&self, message: &Message, reason: &str) -> MessageState {
        match self
            .dead_letters
            .dead_letter(&message.event, message.receive_count, reason)
            .await
        {
            Ok(()) => {
                self.buffer.acknowledge(&message.receipt);
                self.transition(message, MessageState::DeadLettered)
            }
            Err(e) => {
                // Keep the message; it comes back and is dead-lettered again.
                let delay = self.settings.retry.next_delay(message.receive_count);
                tracing::error!(
                    message_id = %message.id,
                    event_id = %message.event.id,
                    error = %e,
                    "dead-letter write failed, releasing message"
                );
                self.buffer.release_after(&message.receipt, delay);
                self.transition(message, MessageState::Retrying)
            }
        }
    }

    fn transition(&self, message: &Message, state: MessageState) -> MessageState {
        tracing::trace!(message_id = %message.id, ?state, "transition");
        self.stats.record(state);
        state
    }
}
