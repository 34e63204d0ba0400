//! querysynth: synthesized accuracy checks for metrics query backends.
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐   ┌──────────┐
//! │ BatchDriver  │──►│ Synthesizer │──►│  Executor  │──►│ Verifier │──►│   Sink   │
//! │ (tick loop)  │   │ (catalog)   │   │ (HTTP GET) │   │ (JSON)   │   │ (metrics)│
//! └──────────────┘   └─────────────┘   └────────────┘   └──────────┘   └──────────┘
//! ```
//!
//! Every synthesized query counts series at a known cardinality class, so the
//! expected answer is known before the query is sent. Outcomes are attributed
//! to a `cardinality:range:step` group and published as counters plus a
//! latency distribution.
//!
//! The same synthesis shape also drives [`rules`], which prints a recording
//! rule file instead of executing anything.

pub mod catalog;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod labels;
pub mod rules;
pub mod sink;
pub mod synth;
pub mod verify;

pub use catalog::{QueryCatalog, QueryTemplate, TimeRangeBucket};
pub use client::{HttpQueryClient, QueryExecutor};
pub use config::ReadConfig;
pub use driver::{BatchDriver, BatchReport, RunSummary};
pub use error::{Error, Result};
pub use sink::{MetricsSink, OutcomeSink, RecordingSink};
pub use synth::{BatchRequest, GroupKey, QuerySet, Synthesizer};
pub use verify::{verify, Outcome};
