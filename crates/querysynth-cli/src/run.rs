//! `querysynth run`: the long-running query loop.

use crate::{load_catalog, SynthArgs};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use querysynth_core::config::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUERY_URL};
use querysynth_core::sink::FanoutSink;
use querysynth_core::{
    BatchDriver, HttpQueryClient, MetricsSink, OutcomeSink, QueryCatalog, ReadConfig,
    RecordingSink, Synthesizer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Range-query endpoint.
    #[arg(long, default_value = DEFAULT_QUERY_URL)]
    url: Url,

    /// Nominal batch size.
    #[arg(long, default_value_t = 475)]
    size: i64,

    /// Largest cardinality class to query.
    #[arg(long, default_value_t = 1_000_000)]
    max_cardinality: u64,

    /// Seconds between batches.
    #[arg(long, default_value_t = 30)]
    interval_secs: u64,

    /// Tenant sent as `X-Scope-OrgID`.
    #[arg(long)]
    tenant: Option<String>,

    /// Bearer token for the `Authorization` header.
    #[arg(long, env = "QUERYSYNTH_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Cap on concurrent requests within a batch.
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Stop after this many batches.
    #[arg(long)]
    max_batches: Option<u64>,

    /// Address for the Prometheus scrape endpoint.
    #[arg(long, default_value = "0.0.0.0:9091")]
    metrics_listen: SocketAddr,

    #[command(flatten)]
    synth: SynthArgs,
}

impl RunArgs {
    pub fn to_config(&self) -> Result<ReadConfig> {
        let config = ReadConfig {
            url: self.url.clone(),
            request_interval: Duration::from_secs(self.interval_secs),
            size: self.size,
            max_cardinality: self.max_cardinality,
            tenant: self.tenant.clone(),
            const_labels: self.synth.labels.clone(),
            bearer_token: self.bearer_token.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
            max_in_flight: self.max_in_flight,
            max_batches: self.max_batches,
        };
        config.normalized().context("invalid run configuration")
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.to_config()?;
    let catalog = load_catalog(args.synth.catalog.as_deref(), QueryCatalog::read_default)?;

    PrometheusBuilder::new()
        .with_http_listener(args.metrics_listen)
        .install()
        .with_context(|| format!("failed to start metrics listener on {}", args.metrics_listen))?;
    MetricsSink::describe();
    tracing::info!(listen = %args.metrics_listen, "metrics endpoint ready");

    let tally = Arc::new(RecordingSink::new());
    let sinks: Vec<Arc<dyn OutcomeSink>> = vec![Arc::new(MetricsSink::new()), tally.clone()];
    let client = HttpQueryClient::new(&config).context("failed to build HTTP client")?;
    let driver = BatchDriver::from_config(
        &config,
        Synthesizer::new(catalog),
        Arc::new(client),
        Arc::new(FanoutSink::new(sinks)),
    )?;

    tracing::info!(
        url = %config.url,
        tenant = config.tenant.as_deref().unwrap_or("-"),
        auth = config.bearer_token.is_some(),
        "querying"
    );

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested; finishing current batch");
        let _ = tx.send(true);
    });

    let summary = driver.run(rx).await;

    eprintln!(
        "{} {} batches, {} queries, {} matched, {} mismatched, {} failed",
        "done".green().bold(),
        summary.batches,
        summary.queries,
        summary.matched,
        summary.mismatched,
        summary.failed
    );
    for (group, t) in tally.snapshot() {
        let mean_ms = if t.issued == 0 {
            0.0
        } else {
            t.total_latency.as_secs_f64() * 1_000.0 / t.issued as f64
        };
        tracing::info!(
            group = %group,
            issued = t.issued,
            matched = t.matched,
            mismatched = t.mismatched,
            failed = t.failed(),
            mean_ms,
            "group summary"
        );
    }
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM. If no signal can be installed, never resolve
/// so the loop keeps running until its batch limit.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
