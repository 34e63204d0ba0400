//! Template registry and distribution tables.
//!
//! A [`QueryCatalog`] bundles everything the synthesizer needs to turn a batch
//! size into concrete queries:
//!
//! - one [`QueryTemplate`] per cardinality class,
//! - a relative weight per cardinality class,
//! - a list of [`TimeRangeBucket`]s (lookback window, sampling step, weight),
//! - the normalization constant the weights were calibrated against.
//!
//! Catalogs are immutable once built. They are passed to the synthesizer by
//! value (or behind an `Arc`), so differently configured synthesizers can live
//! side by side.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const LABELS_MARKER: &str = "{labels}";
pub const RANGE_MARKER: &str = "{range}";
pub const STEP_MARKER: &str = "{step}";
pub const INSTANCE_MARKER: &str = "{instance}";

/// Sum of the default cardinality weights at the reference batch size.
pub const DEFAULT_NORMALIZATION: i64 = 475;

const MARKERS: [&str; 4] = [LABELS_MARKER, RANGE_MARKER, STEP_MARKER, INSTANCE_MARKER];

// ============================================================================
// Templates
// ============================================================================

/// A query shape with exactly one of each placeholder marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    raw: String,
}

impl QueryTemplate {
    pub fn new(cardinality: u64, raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        for marker in MARKERS {
            let seen = raw.matches(marker).count();
            if seen != 1 {
                return Err(Error::InvalidTemplate {
                    cardinality,
                    reason: format!("expected exactly one `{marker}`, found {seen}"),
                });
            }
        }
        Ok(Self { raw })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitute everything except the instance index.
    ///
    /// The template is split at the instance marker first, so label values
    /// can never be mistaken for a marker during the later instance step.
    pub fn bind(&self, range: &str, step: &str, labels: &str) -> BoundTemplate {
        let (head, tail) = self
            .raw
            .split_once(INSTANCE_MARKER)
            .unwrap_or((self.raw.as_str(), ""));
        let fill = |part: &str| {
            part.replacen(RANGE_MARKER, range, 1)
                .replacen(STEP_MARKER, step, 1)
                .replacen(LABELS_MARKER, labels, 1)
        };
        BoundTemplate {
            head: fill(head),
            tail: fill(tail),
        }
    }
}

/// A template with range, step and labels filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTemplate {
    head: String,
    tail: String,
}

impl BoundTemplate {
    pub fn instantiate(&self, instance: u64) -> String {
        let mut out = String::with_capacity(self.head.len() + self.tail.len() + 8);
        out.push_str(&self.head);
        out.push_str(&instance.to_string());
        out.push_str(&self.tail);
        out
    }
}

// ============================================================================
// Time ranges
// ============================================================================

/// A lookback window with its sampling step and relative weight.
///
/// `weight == None` means the bucket is known but never sampled.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRangeBucket {
    pub range: String,
    pub step: String,
    pub weight: Option<f64>,
    lookback_secs: i64,
    step_secs: i64,
}

impl TimeRangeBucket {
    pub fn new(range: impl Into<String>, step: impl Into<String>, weight: Option<f64>) -> Result<Self> {
        let range = range.into();
        let step = step.into();
        let lookback_secs = parse_seconds(&range)?;
        let step_secs = parse_seconds(&step)?;
        if lookback_secs == 0 || step_secs == 0 {
            return Err(Error::Catalog(format!(
                "time range `{range}` with step `{step}` must have a non-zero window and step"
            )));
        }
        if let Some(w) = weight {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Catalog(format!(
                    "time range `{range}` has invalid weight {w}"
                )));
            }
        }
        Ok(Self {
            range,
            step,
            weight,
            lookback_secs,
            step_secs,
        })
    }

    pub fn lookback_secs(&self) -> i64 {
        self.lookback_secs
    }

    pub fn step_secs(&self) -> i64 {
        self.step_secs
    }
}

/// Parse whole seconds (`"7200"`) or a single-unit duration literal (`"30m"`).
pub fn parse_seconds(value: &str) -> Result<i64> {
    let invalid = || Error::InvalidTimeRange {
        value: value.to_string(),
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(['{', '}']) {
        return Err(invalid());
    }
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    let scale = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        "y" => 365 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    n.checked_mul(scale).ok_or_else(invalid)
}

// ============================================================================
// Catalog
// ============================================================================

/// On-disk shape of a catalog (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub templates: BTreeMap<u64, String>,
    pub cardinality_weights: BTreeMap<u64, i64>,
    pub steps: BTreeMap<String, String>,
    pub time_weights: BTreeMap<String, f64>,
    #[serde(default = "default_normalization")]
    pub normalization: i64,
}

fn default_normalization() -> i64 {
    DEFAULT_NORMALIZATION
}

#[derive(Debug, Clone)]
pub struct QueryCatalog {
    templates: BTreeMap<u64, QueryTemplate>,
    cardinality_weights: BTreeMap<u64, i64>,
    buckets: Vec<TimeRangeBucket>,
    normalization: i64,
}

impl QueryCatalog {
    pub fn from_file(file: CatalogFile) -> Result<Self> {
        if file.normalization <= 0 {
            return Err(Error::Catalog(format!(
                "normalization must be > 0 (got {})",
                file.normalization
            )));
        }

        let mut templates = BTreeMap::new();
        for (class, raw) in file.templates {
            if class == 0 {
                return Err(Error::Catalog("cardinality class 0 is not allowed".to_string()));
            }
            templates.insert(class, QueryTemplate::new(class, raw)?);
        }

        for (&class, &weight) in &file.cardinality_weights {
            if class == 0 || weight < 0 {
                return Err(Error::Catalog(format!(
                    "invalid cardinality weight {weight} for class {class}"
                )));
            }
        }

        let buckets = file
            .steps
            .into_iter()
            .map(|(range, step)| {
                let weight = file.time_weights.get(&range).copied();
                TimeRangeBucket::new(range, step, weight)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            templates,
            cardinality_weights: file.cardinality_weights,
            buckets,
            normalization: file.normalization,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(text)?;
        Self::from_file(file)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Tables used by the read (query-and-verify) path.
    pub fn read_default() -> Self {
        let file = CatalogFile {
            templates: [
                (10, avalanche_template(1, None, "s")),
                (100, avalanche_template(2, None, "s")),
                (1_000, avalanche_template(3, None, "s")),
                (10_000, avalanche_template(3, Some(1), "s")),
                (100_000, avalanche_template(3, Some(2), "s")),
                (1_000_000, avalanche_template(3, Some(3), "s")),
            ]
            .into_iter()
            .collect(),
            cardinality_weights: [
                (10, 200),
                (100, 200),
                (1_000, 50),
                (10_000, 10),
                (100_000, 10),
                (1_000_000, 5),
            ]
            .into_iter()
            .collect(),
            steps: string_table(&[
                ("7200", "10"),
                ("86400", "60"),
                ("806800", "600"),
                ("25920000", "600"),
            ]),
            time_weights: [("7200", 0.5), ("86400", 0.35), ("806800", 0.1), ("25920000", 0.05)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            normalization: DEFAULT_NORMALIZATION,
        };
        Self::from_file(file).expect("built-in read catalog is valid")
    }

    /// Tables used for recording-rule emission.
    pub fn rules_default() -> Self {
        let mut templates: BTreeMap<u64, String> = BTreeMap::new();
        templates.insert(
            1,
            format!(
                "max_over_time(count({{series_id=~\"0\", __name__=~\"avalanche_metric_mmmmm_._{INSTANCE_MARKER}\",{LABELS_MARKER}}})[{RANGE_MARKER}:{STEP_MARKER}])"
            ),
        );
        templates.insert(10, avalanche_template(1, None, ""));
        templates.insert(100, avalanche_template(2, None, ""));
        templates.insert(1_000, avalanche_template(3, None, ""));
        templates.insert(10_000, avalanche_template(3, Some(1), ""));
        templates.insert(100_000, avalanche_template(3, Some(2), ""));
        templates.insert(1_000_000, avalanche_template(3, Some(3), ""));

        let file = CatalogFile {
            templates,
            cardinality_weights: [
                (1, 200),
                (10, 200),
                (100, 50),
                (1_000, 10),
                (10_000, 10),
                (100_000, 5),
            ]
            .into_iter()
            .collect(),
            steps: string_table(&[
                ("30m", "30s"),
                ("2h", "30s"),
                ("24h", "1m"),
                ("7d", "10m"),
                ("30d", "10m"),
            ]),
            time_weights: [("30m", 0.9), ("2h", 0.08), ("24h", 0.02), ("30d", 0.001)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            normalization: DEFAULT_NORMALIZATION,
        };
        Self::from_file(file).expect("built-in rules catalog is valid")
    }

    /// Template for a class, or `None` when the class is unsupported.
    pub fn template(&self, cardinality: u64) -> Option<&QueryTemplate> {
        self.templates.get(&cardinality)
    }

    pub fn cardinality_weight(&self, cardinality: u64) -> Option<i64> {
        self.cardinality_weights.get(&cardinality).copied()
    }

    /// Weighted cardinality classes in ascending order.
    pub fn cardinality_classes(&self) -> impl Iterator<Item = (u64, i64)> + '_ {
        self.cardinality_weights.iter().map(|(&k, &v)| (k, v))
    }

    pub fn buckets(&self) -> &[TimeRangeBucket] {
        &self.buckets
    }

    pub fn bucket(&self, range: &str) -> Option<&TimeRangeBucket> {
        self.buckets.iter().find(|b| b.range == range)
    }

    pub fn normalization(&self) -> i64 {
        self.normalization
    }

    /// Nominal number of queries for one (class, bucket) pair.
    ///
    /// `weight * size / normalization` is integer division; the product with
    /// the bucket weight is truncated, then floored at one.
    pub fn nominal_count(&self, class_weight: i64, bucket_weight: f64, size: i64) -> u64 {
        let scaled = class_weight.saturating_mul(size) / self.normalization;
        let num = (scaled as f64 * bucket_weight).max(1.0);
        num as u64
    }
}

/// `count(...)` over an avalanche-style metric family.
///
/// `series_digits` bounds the `series_id` regex; `metric_digits` adds a
/// numeric suffix to the metric name to fan out across metric families.
fn avalanche_template(series_digits: u32, metric_digits: Option<u32>, unit: &str) -> String {
    let metric_suffix = metric_digits
        .map(|d| format!("[0-9]{{1,{d}}}"))
        .unwrap_or_default();
    format!(
        "max_over_time(count({{series_id=~\"[0-9]{{1,{series_digits}}}\", __name__=~\"avalanche_metric_mmmmm_._{INSTANCE_MARKER}{metric_suffix}\",{LABELS_MARKER}}})[{RANGE_MARKER}{unit}:{STEP_MARKER}{unit}])"
    )
}

fn string_table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_requires_each_marker_once() {
        let err = QueryTemplate::new(10, "count({__name__=~\"m_{instance}\"})").unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate { cardinality: 10, .. }));

        let doubled = "{labels}{labels}{range}{step}{instance}";
        assert!(QueryTemplate::new(10, doubled).is_err());

        assert!(QueryTemplate::new(10, "{labels}{range}{step}{instance}").is_ok());
    }

    #[test]
    fn bind_then_instantiate_fills_every_marker() {
        let t = QueryTemplate::new(10, "f({a=\"{instance}\",{labels}})[{range}s:{step}s]").unwrap();
        let q = t.bind("7200", "10", "env=\"prod\"").instantiate(3);
        assert_eq!(q, "f({a=\"3\",env=\"prod\"})[7200s:10s]");
    }

    #[test]
    fn label_values_cannot_inject_instance_marker() {
        let t = QueryTemplate::new(10, "{labels}|{range}|{step}|{instance}").unwrap();
        let q = t.bind("1", "2", "x=\"{instance}\"").instantiate(9);
        assert_eq!(q, "x=\"{instance}\"|1|2|9");
    }

    #[test]
    fn parse_seconds_accepts_plain_and_suffixed() {
        assert_eq!(parse_seconds("7200").unwrap(), 7200);
        assert_eq!(parse_seconds("30s").unwrap(), 30);
        assert_eq!(parse_seconds("30m").unwrap(), 1800);
        assert_eq!(parse_seconds("2h").unwrap(), 7200);
        assert_eq!(parse_seconds("7d").unwrap(), 604_800);
        assert!(parse_seconds("").is_err());
        assert!(parse_seconds("10x").is_err());
        assert!(parse_seconds("m").is_err());
    }

    #[test]
    fn read_default_tables() {
        let c = QueryCatalog::read_default();
        assert_eq!(c.normalization(), 475);
        assert_eq!(c.buckets().len(), 4);
        assert_eq!(c.cardinality_classes().count(), 6);
        let total: i64 = c.cardinality_classes().map(|(_, w)| w).sum();
        assert_eq!(total, 475);
        let b = c.bucket("86400").unwrap();
        assert_eq!(b.step, "60");
        assert_eq!(b.weight, Some(0.35));
        assert_eq!(b.lookback_secs(), 86_400);
        assert!(c.template(1_000_000).is_some());
        assert!(c.template(5).is_none());
    }

    #[test]
    fn rules_default_has_unweighted_bucket() {
        let c = QueryCatalog::rules_default();
        assert_eq!(c.bucket("7d").unwrap().weight, None);
        assert_eq!(c.bucket("30m").unwrap().step_secs(), 30);
        // Template exists but no weight: never sampled.
        assert!(c.template(1_000_000).is_some());
        assert!(c.cardinality_weight(1_000_000).is_none());
    }

    #[test]
    fn nominal_count_truncates_then_floors_at_one() {
        let c = QueryCatalog::read_default();
        assert_eq!(c.nominal_count(200, 0.5, 475), 100);
        assert_eq!(c.nominal_count(5, 0.05, 475), 1);
        assert_eq!(c.nominal_count(200, 0.5, 0), 1);
        assert_eq!(c.nominal_count(200, 0.5, -100), 1);
        // 50 * 100 / 475 = 10 (integer), * 0.35 = 3.5 -> 3
        assert_eq!(c.nominal_count(50, 0.35, 100), 3);
    }

    #[test]
    fn from_json_roundtrips_catalog_file() {
        let json = r#"{
            "templates": {"5": "c({x=\"{instance}\",{labels}})[{range}:{step}]"},
            "cardinality_weights": {"5": 10},
            "steps": {"60": "5"},
            "time_weights": {"60": 1.0}
        }"#;
        let c = QueryCatalog::from_json(json).unwrap();
        assert_eq!(c.normalization(), DEFAULT_NORMALIZATION);
        assert_eq!(c.cardinality_weight(5), Some(10));
        assert_eq!(c.bucket("60").unwrap().step_secs(), 5);
    }

    #[test]
    fn zero_step_or_window_is_rejected() {
        assert!(matches!(
            TimeRangeBucket::new("3600", "0", Some(1.0)),
            Err(Error::Catalog(_))
        ));
        assert!(TimeRangeBucket::new("0s", "10", Some(1.0)).is_err());

        let json = r#"{
            "templates": {},
            "cardinality_weights": {},
            "steps": {"3600": "0"},
            "time_weights": {"3600": 1.0}
        }"#;
        assert!(matches!(QueryCatalog::from_json(json), Err(Error::Catalog(_))));
    }

    #[test]
    fn from_json_rejects_bad_bucket() {
        let json = r#"{
            "templates": {},
            "cardinality_weights": {},
            "steps": {"forever": "5"},
            "time_weights": {}
        }"#;
        assert!(matches!(
            QueryCatalog::from_json(json),
            Err(Error::InvalidTimeRange { .. })
        ));
    }
}
