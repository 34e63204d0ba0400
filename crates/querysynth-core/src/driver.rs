//! Batch driver: tick, synthesize, fan out, wait, repeat.
//!
//! Each tick runs one batch to completion before the next tick is looked at,
//! so a slow backend delays (and skips) ticks instead of stacking batches.
//! In-flight requests per batch are capped by a semaphore; every task of the
//! batch is still joined before the batch counts as done.

use crate::client::QueryExecutor;
use crate::config::{ReadConfig, DEFAULT_MAX_IN_FLIGHT};
use crate::error::Result;
use crate::sink::OutcomeSink;
use crate::synth::{BatchRequest, GroupKey, Synthesizer};
use crate::verify::{verify, Outcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What happened in one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub queries: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub empty: usize,
    pub transport_failures: usize,
    /// Tasks that panicked; their outcome was never emitted.
    pub aborted: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Matched => self.matched += 1,
            Outcome::Mismatched { .. } => self.mismatched += 1,
            Outcome::Empty => self.empty += 1,
            Outcome::TransportFailure { .. } => self.transport_failures += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.mismatched + self.empty + self.transport_failures
    }
}

/// Totals across every batch of a [`BatchDriver::run`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub queries: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub failed: usize,
}

impl RunSummary {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.queries += report.queries;
        self.matched += report.matched;
        self.mismatched += report.mismatched;
        self.failed += report.failed();
    }
}

pub struct BatchDriver {
    synthesizer: Synthesizer,
    executor: Arc<dyn QueryExecutor>,
    sink: Arc<dyn OutcomeSink>,
    request: BatchRequest,
    interval: Duration,
    max_in_flight: usize,
    max_batches: Option<u64>,
}

impl BatchDriver {
    pub fn new(
        synthesizer: Synthesizer,
        executor: Arc<dyn QueryExecutor>,
        sink: Arc<dyn OutcomeSink>,
        request: BatchRequest,
    ) -> Self {
        Self {
            synthesizer,
            executor,
            sink,
            request,
            interval: Duration::from_secs(30),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_batches: None,
        }
    }

    pub fn from_config(
        config: &ReadConfig,
        synthesizer: Synthesizer,
        executor: Arc<dyn QueryExecutor>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<Self> {
        Ok(Self::new(synthesizer, executor, sink, config.batch_request()?)
            .with_interval(config.request_interval)
            .with_max_in_flight(config.max_in_flight)
            .with_max_batches(config.max_batches))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_max_batches(mut self, max_batches: Option<u64>) -> Self {
        self.max_batches = max_batches;
        self
    }

    /// Tick until shutdown (or the batch limit), one full batch per tick.
    ///
    /// The first batch starts one interval after the call. A shutdown request
    /// never interrupts a running batch; it only prevents the next one.
    /// Dropping the sender counts as a shutdown request.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut summary = RunSummary::default();

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            size = self.request.size,
            max_cardinality = self.request.max_cardinality,
            max_in_flight = self.max_in_flight,
            "query loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            // Shutdown first: a pending request beats a tick that is also ready.
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.run_batch().await;
                    summary.absorb(&report);
                    if self.max_batches.is_some_and(|max| summary.batches >= max) {
                        tracing::info!(batches = summary.batches, "batch limit reached");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            batches = summary.batches,
            queries = summary.queries,
            matched = summary.matched,
            failed = summary.failed,
            "query loop stopped"
        );
        summary
    }

    /// Synthesize and execute one batch, returning once every query is done.
    pub async fn run_batch(&self) -> BatchReport {
        let started = Instant::now();
        let queries = self.synthesizer.synthesize(&self.request);
        let mut report = BatchReport {
            queries: queries.len(),
            ..Default::default()
        };
        if queries.is_empty() {
            tracing::debug!("no eligible queries this tick");
            return report;
        }

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        for (query, group) in queries {
            let permits = Arc::clone(&permits);
            let executor = Arc::clone(&self.executor);
            let sink = Arc::clone(&self.sink);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                execute_one(executor.as_ref(), sink.as_ref(), &query, &group).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    report.aborted += 1;
                    tracing::warn!(error = %e, "query task aborted");
                }
            }
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            queries = report.queries,
            matched = report.matched,
            mismatched = report.mismatched,
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "query batch complete"
        );
        report
    }
}

/// Execute, verify and emit exactly one outcome for a single query.
pub async fn execute_one(
    executor: &dyn QueryExecutor,
    sink: &dyn OutcomeSink,
    query: &str,
    group: &GroupKey,
) -> Outcome {
    let started = Instant::now();
    let result = executor
        .execute(query, group.lookback_secs(), group.step_secs())
        .await;
    let latency = started.elapsed();

    let expected = group.expected_value();
    let outcome = match result {
        Ok(body) => verify(&body, &expected),
        Err(e) => {
            tracing::warn!(group = %group, error = %e, "query transport failure");
            Outcome::TransportFailure {
                error: e.to_string(),
            }
        }
    };

    match &outcome {
        Outcome::Mismatched { got } => {
            tracing::debug!(group = %group, query, expected = %expected, got = %got, "unexpected query value");
        }
        Outcome::Empty => {
            tracing::debug!(group = %group, query, "query returned no data");
        }
        _ => {}
    }

    sink.emit(group, &outcome, latency);
    outcome
}
