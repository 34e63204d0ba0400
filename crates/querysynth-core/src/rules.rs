//! Recording-rule emission.
//!
//! Produces a Prometheus rule file whose expressions follow the same
//! synthesis shape as the read path, so a ruler can be loaded with a
//! calibrated mix of cardinalities and lookback windows. Nothing is executed.

use crate::synth::{BatchRequest, Synthesizer};
use rand::Rng;
use std::fmt::Write as _;

/// Each rule series is replicated this many times by the load generator.
pub const RULE_FANOUT: u64 = 40;

/// Rules per group.
pub const RULES_PER_GROUP: u64 = 100;

pub const DEFAULT_RULE_SIZE: i64 = 3300;
pub const DEFAULT_RULE_MAX_CARDINALITY: u64 = 4_000_001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRule {
    pub record: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleGroup {
    pub name: String,
    pub rules: Vec<RecordingRule>,
}

/// Upper bound (exclusive) of the metric-family index for a class.
///
/// Classes above 1000 spread over `class / 1000` metric families.
fn metric_index_bound(cardinality: u64) -> u64 {
    if cardinality > 1_000 {
        (cardinality / 1_000).min(1_000)
    } else {
        1_000
    }
}

/// Build rule groups for every class whose fanned-out cardinality fits.
pub fn build_rule_groups<R: Rng>(
    synthesizer: &Synthesizer,
    request: &BatchRequest,
    rng: &mut R,
) -> Vec<RuleGroup> {
    let plan = synthesizer.plan_filtered(request, |class| {
        class.saturating_mul(RULE_FANOUT) <= request.max_cardinality
    });

    let mut groups = Vec::new();
    let mut record_index: u64 = 0;
    for planned in plan {
        let key = &planned.key;
        let upper = metric_index_bound(key.cardinality).saturating_sub(1).max(1);
        for i in 0..planned.count {
            if i % RULES_PER_GROUP == 0 {
                groups.push(RuleGroup {
                    name: format!(
                        "{}:{}:{}:{}",
                        key.cardinality * RULE_FANOUT,
                        key.range,
                        key.step,
                        i / RULES_PER_GROUP
                    ),
                    rules: Vec::new(),
                });
            }
            let instance = rng.random_range(1..=upper);
            let rule = RecordingRule {
                record: format!("record:{}", record_index + i),
                expr: planned.instantiate(instance),
            };
            if let Some(group) = groups.last_mut() {
                group.rules.push(rule);
            }
        }
        record_index += planned.count;
    }
    groups
}

/// Render groups as a Prometheus rule file.
pub fn render_rule_file(groups: &[RuleGroup]) -> String {
    let mut out = String::from("groups:\n");
    for group in groups {
        let _ = writeln!(out, "  - name: {}", yaml_quote(&group.name));
        out.push_str("    rules:\n");
        for rule in &group.rules {
            let _ = writeln!(out, "      - record: {}", rule.record);
            let _ = writeln!(out, "        expr: {}", yaml_quote(&rule.expr));
        }
    }
    out
}

fn yaml_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
