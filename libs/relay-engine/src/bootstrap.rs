use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use relay_api::{Attributes, Clock, DeadLetterEntry, DeadLetterSink, Event, RelayError, TargetClient, TtlStore};

use crate::buffer::{BufferCounts, SourceBuffer};
use crate::config::RelayConfig;
use crate::dead_letter::DeadLetterRouter;
use crate::dispatch::TargetDispatcher;
use crate::enrich::EnrichmentResolver;
use crate::error::EngineError;
use crate::ingress::{Admission, Ingress};
use crate::orchestrator::{PipeOrchestrator, PipeSettings, PipeStats, PipeStatsSnapshot};
use crate::rate_limit::RateLimiter;
use crate::rule::EventRule;

/// Concrete implementations of the seams, chosen by the caller.
pub struct PipeComponents {
    pub store: Arc<dyn TtlStore>,
    pub client: Arc<dyn TargetClient>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub clock: Arc<dyn Clock>,
}

/// Counters reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub buffer: BufferCounts,
    pub pipe: PipeStatsSnapshot,
}

/// Cloneable access to a running engine, for the API server.
#[derive(Clone)]
pub struct EngineHandle {
    ingress: Ingress,
    buffer: Arc<SourceBuffer>,
    store: Arc<dyn TtlStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    stats: Arc<PipeStats>,
    record_ttl: Duration,
}

impl EngineHandle {
    pub fn accept(&self, event: Event) -> Admission {
        self.ingress.accept(event)
    }

    pub fn accept_batch(&self, events: Vec<Event>) -> Vec<Admission> {
        self.ingress.accept_batch(events)
    }

    /// Write an enrichment record with the configured TTL.
    pub async fn put_record(&self, id: &str, attributes: Attributes) -> Result<(), RelayError> {
        self.store.put(id, attributes, self.record_ttl).await?;
        tracing::debug!(correlation_id = %id, ttl_secs = self.record_ttl.as_secs(), "enrichment record stored");
        Ok(())
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, RelayError> {
        self.dead_letters.list().await
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            buffer: self.buffer.counts(),
            pipe: self.stats.snapshot(),
        }
    }
}

/// The running pipe: worker pool plus record sweeper.
pub struct Engine {
    handle: EngineHandle,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build all components from `config` and spawn the workers.
    pub async fn bootstrap(config: RelayConfig, components: PipeComponents) -> Result<Self, EngineError> {
        config.validate()?;
        let PipeComponents {
            store,
            client,
            dead_letters,
            clock,
        } = components;

        let buffer = Arc::new(SourceBuffer::new(config.pipe.visibility_timeout()));
        let limiter = Arc::new(RateLimiter::per_second(config.target.rate_limit_per_second));
        let orchestrator = Arc::new(PipeOrchestrator::new(
            buffer.clone(),
            EnrichmentResolver::new(
                store.clone(),
                clock.clone(),
                config.enrichment.correlation_field.clone(),
                config.enrichment.fields.clone(),
            ),
            TargetDispatcher::new(client, limiter),
            DeadLetterRouter::new(dead_letters.clone(), clock),
            PipeSettings::from_config(&config.pipe),
        ));

        let token = CancellationToken::new();
        let mut tasks = Vec::with_capacity(config.pipe.workers + 1);
        for worker in 0..config.pipe.workers {
            tasks.push(tokio::spawn(orchestrator.clone().run_worker(worker, token.child_token())));
        }
        let purge_interval = Duration::from_secs(config.enrichment.purge_interval_secs);
        if !purge_interval.is_zero() {
            tasks.push(tokio::spawn(run_sweeper(store.clone(), purge_interval, token.child_token())));
        }

        tracing::info!(
            workers = config.pipe.workers,
            batch_size = config.pipe.source_batch_size,
            rate_limit_per_second = config.target.rate_limit_per_second,
            absent_policy = ?config.pipe.absent_policy,
            permanent_failure_policy = ?config.pipe.permanent_failure_policy,
            "engine started"
        );

        let handle = EngineHandle {
            ingress: Ingress::new(EventRule::from_config(&config.rule), buffer.clone()),
            buffer,
            store,
            dead_letters,
            stats: orchestrator.stats().clone(),
            record_ttl: config.enrichment.record_ttl(),
        };
        Ok(Self { handle, token, tasks })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Token cancelled on shutdown; child tasks (API server) can hang off it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop workers and the sweeper, and wait for them.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "engine task failed");
            }
        }
        tracing::info!("engine shut down");
    }
}

async fn run_sweeper(store: Arc<dyn TtlStore>, every: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = token.cancelled() => break,
        }
        match store.purge_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(purged = n, "expired enrichment records purged"),
            Err(e) => tracing::warn!(error = %e, "enrichment record purge failed"),
        }
    }
}
