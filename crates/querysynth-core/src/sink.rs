//! Outcome sinks.
//!
//! Every executed query produces exactly one [`OutcomeSink::emit`] call. The
//! sink is shared by all tasks of a batch, so implementations must be cheap
//! and thread-safe.

use crate::synth::GroupKey;
use crate::verify::Outcome;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

pub const QUERY_TOTAL: &str = "promql_query_total";
pub const QUERY_MATCHED: &str = "promql_query_value_match";
pub const QUERY_FAILURES: &str = "promql_query_failures";
pub const QUERY_LATENCY: &str = "store_query_request_durations";

pub trait OutcomeSink: Send + Sync {
    fn emit(&self, group: &GroupKey, outcome: &Outcome, latency: Duration);
}

/// Publishes through the `metrics` facade, labelled by `group`.
///
/// Without an installed recorder every call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct MetricsSink;

impl MetricsSink {
    pub fn new() -> Self {
        Self
    }

    /// Register help text with whatever recorder is installed.
    pub fn describe() {
        metrics::describe_counter!(QUERY_TOTAL, "The total number of queries generated");
        metrics::describe_counter!(QUERY_MATCHED, "The total number of queries that returned the expected value");
        metrics::describe_counter!(QUERY_FAILURES, "The total number of queries that failed, returned no data or returned an unexpected value");
        metrics::describe_histogram!(
            QUERY_LATENCY,
            metrics::Unit::Seconds,
            "Query request latencies in seconds"
        );
    }
}

impl OutcomeSink for MetricsSink {
    fn emit(&self, group: &GroupKey, outcome: &Outcome, latency: Duration) {
        let group = group.to_string();
        counter!(QUERY_TOTAL, "group" => group.clone()).increment(1);
        histogram!(QUERY_LATENCY, "group" => group.clone()).record(latency.as_secs_f64());
        if outcome.is_match() {
            counter!(QUERY_MATCHED, "group" => group).increment(1);
        } else if outcome.is_failure() {
            counter!(QUERY_FAILURES, "group" => group).increment(1);
        }
    }
}

/// Per-group tallies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTally {
    pub issued: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub empty: u64,
    pub transport_failures: u64,
    pub total_latency: Duration,
}

impl GroupTally {
    pub fn failed(&self) -> u64 {
        self.mismatched + self.empty + self.transport_failures
    }

    fn record(&mut self, outcome: &Outcome, latency: Duration) {
        self.issued += 1;
        self.total_latency += latency;
        match outcome {
            Outcome::Matched => self.matched += 1,
            Outcome::Mismatched { .. } => self.mismatched += 1,
            Outcome::Empty => self.empty += 1,
            Outcome::TransportFailure { .. } => self.transport_failures += 1,
        }
    }

    fn merge(&mut self, other: &GroupTally) {
        self.issued += other.issued;
        self.matched += other.matched;
        self.mismatched += other.mismatched;
        self.empty += other.empty;
        self.transport_failures += other.transport_failures;
        self.total_latency += other.total_latency;
    }
}

/// Keeps tallies in memory; used for run summaries and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    groups: Mutex<BTreeMap<GroupKey, GroupTally>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<GroupKey, GroupTally> {
        self.groups.lock().clone()
    }

    pub fn totals(&self) -> GroupTally {
        let mut total = GroupTally::default();
        for tally in self.groups.lock().values() {
            total.merge(tally);
        }
        total
    }
}

impl OutcomeSink for RecordingSink {
    fn emit(&self, group: &GroupKey, outcome: &Outcome, latency: Duration) {
        self.groups
            .lock()
            .entry(group.clone())
            .or_default()
            .record(outcome, latency);
    }
}

/// Forwards every outcome to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn OutcomeSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn OutcomeSink>>) -> Self {
        Self { sinks }
    }
}

impl OutcomeSink for FanoutSink {
    fn emit(&self, group: &GroupKey, outcome: &Outcome, latency: Duration) {
        for sink in &self.sinks {
            sink.emit(group, outcome, latency);
        }
    }
}
