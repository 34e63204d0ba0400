//! querysynth CLI
//!
//! - `run`: synthesize queries every interval, execute them against a
//!   Prometheus-compatible range-query endpoint, verify the answers and
//!   export per-group accuracy/latency metrics
//! - `plan`: show what one batch would contain, without sending anything
//! - `rules`: print a recording-rule file built from the same synthesis shape

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use querysynth_core::labels::format_labels;
use querysynth_core::rules::{
    build_rule_groups, render_rule_file, DEFAULT_RULE_MAX_CARDINALITY, DEFAULT_RULE_SIZE,
};
use querysynth_core::{BatchRequest, QueryCatalog, Synthesizer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};

mod logging;
mod plan;
mod run;

#[derive(Parser)]
#[command(name = "querysynth")]
#[command(
    author,
    version,
    about = "querysynth: synthesized accuracy and latency checks for metrics query backends"
)]
struct Cli {
    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the synthesize → query → verify loop until interrupted.
    Run(run::RunArgs),

    /// Show the per-group plan for one batch without executing it.
    Plan(PlanArgs),

    /// Print a Prometheus recording-rule file.
    Rules(RulesArgs),
}

/// Inputs shared by every command that synthesizes queries.
#[derive(Args, Debug, Clone)]
pub(crate) struct SynthArgs {
    /// Constant label `key=value` added to every selector (repeatable).
    #[arg(long = "label")]
    labels: Vec<String>,

    /// JSON catalog overriding the built-in templates and weights.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    /// Nominal batch size.
    #[arg(long, default_value_t = 475)]
    size: i64,

    /// Largest cardinality class to include.
    #[arg(long, default_value_t = 1_000_000)]
    max_cardinality: u64,

    /// RNG seed for instance selection (random when omitted).
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    synth: SynthArgs,
}

#[derive(Args, Debug, Clone)]
struct RulesArgs {
    /// Nominal number of rules.
    #[arg(long, default_value_t = DEFAULT_RULE_SIZE)]
    size: i64,

    /// Largest fanned-out cardinality (40 × class) to include.
    #[arg(long, default_value_t = DEFAULT_RULE_MAX_CARDINALITY)]
    max_cardinality: u64,

    /// RNG seed for instance selection (random when omitted).
    #[arg(long)]
    seed: Option<u64>,

    /// Write the rule file here instead of stdout.
    #[arg(short, long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    synth: SynthArgs,
}

pub(crate) fn load_catalog(
    path: Option<&Path>,
    builtin: fn() -> QueryCatalog,
) -> Result<QueryCatalog> {
    match path {
        Some(path) => QueryCatalog::from_path(path)
            .with_context(|| format!("failed to load catalog {}", path.display())),
        None => Ok(builtin()),
    }
}

pub(crate) fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn cmd_plan(args: PlanArgs) -> Result<()> {
    let catalog = load_catalog(args.synth.catalog.as_deref(), QueryCatalog::read_default)?;
    let request = BatchRequest {
        size: args.size,
        labels: format_labels(&args.synth.labels)?,
        max_cardinality: args.max_cardinality,
    };
    let synthesizer = Synthesizer::new(catalog);
    let mut rng = rng_from(args.seed);
    print!("{}", plan::render(&synthesizer, &request, &mut rng));
    Ok(())
}

fn cmd_rules(args: RulesArgs) -> Result<()> {
    let catalog = load_catalog(args.synth.catalog.as_deref(), QueryCatalog::rules_default)?;
    let request = BatchRequest {
        size: args.size,
        labels: format_labels(&args.synth.labels)?,
        max_cardinality: args.max_cardinality,
    };
    let mut rng = rng_from(args.seed);
    let groups = build_rule_groups(&Synthesizer::new(catalog), &request, &mut rng);
    let text = render_rule_file(&groups);

    match args.out {
        Some(path) => {
            fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
            let rules: usize = groups.iter().map(|g| g.rules.len()).sum();
            eprintln!(
                "{} {} ({} rules in {} groups)",
                "wrote".green().bold(),
                path.display().to_string().bold(),
                rules,
                groups.len()
            );
        }
        None => print!("{text}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Plan(args) => cmd_plan(args),
        Commands::Rules(args) => cmd_rules(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_args_parse_repeatable_labels() {
        let cli = Cli::try_parse_from([
            "querysynth",
            "run",
            "--url",
            "http://prom:9090/api/v1/query_range",
            "--label",
            "env=prod",
            "--label",
            "team=obs",
            "--max-batches",
            "3",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.const_labels, vec!["env=prod", "team=obs"]);
        assert_eq!(config.max_batches, Some(3));
        assert_eq!(config.bearer_token, None);
    }

    #[test]
    fn rules_defaults_match_reference_run() {
        let cli = Cli::try_parse_from(["querysynth", "rules"]).unwrap();
        let Commands::Rules(args) = cli.command else {
            panic!("expected rules");
        };
        assert_eq!(args.size, 3300);
        assert_eq!(args.max_cardinality, 4_000_001);
    }

    #[test]
    fn missing_catalog_file_is_an_error() {
        let err = load_catalog(
            Some(Path::new("/nonexistent/catalog.json")),
            QueryCatalog::read_default,
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to load catalog"));
    }
}
