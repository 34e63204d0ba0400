//! `querysynth plan`: dry-run view of one batch.

use colored::Colorize;
use querysynth_core::{BatchRequest, GroupKey, Synthesizer};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt::Write;

/// One row per group: nominal count from the weights, unique queries
/// actually drawn this time, and the value every query must return.
pub fn render<R: Rng>(synthesizer: &Synthesizer, request: &BatchRequest, rng: &mut R) -> String {
    let planned = synthesizer.planned_counts(request);
    let drawn = synthesizer.synthesize_with_rng(request, rng);

    let mut unique: BTreeMap<&GroupKey, u64> = BTreeMap::new();
    for key in drawn.values() {
        *unique.entry(key).or_insert(0) += 1;
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        format!(
            "{:<28} {:>8} {:>8} {:>10}",
            "group", "nominal", "unique", "expected"
        )
        .bold()
    );
    for (key, nominal) in &planned {
        let _ = writeln!(
            out,
            "{:<28} {:>8} {:>8} {:>10}",
            key.to_string(),
            nominal,
            unique.get(key).copied().unwrap_or(0),
            key.expected_value()
        );
    }
    let nominal_total: u64 = planned.values().sum();
    let _ = writeln!(
        out,
        "{} {} groups, {} nominal, {} unique queries",
        "total".green().bold(),
        planned.len(),
        nominal_total,
        drawn.len()
    );
    out
}
