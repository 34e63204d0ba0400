//! Query synthesis.
//!
//! Turns a batch size into a map of concrete query strings, each tagged with
//! the group it belongs to. The expected result of every query is its group's
//! cardinality class, so verification needs no backend-side state.
//!
//! Instance indices are random; two queries that end up with the same string
//! collapse into one map entry. A batch therefore executes each unique query
//! at most once, and may hold fewer entries than the requested size.

use crate::catalog::{BoundTemplate, QueryCatalog, TimeRangeBucket};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Concrete query string → the group it is attributed to.
pub type QuerySet = HashMap<String, GroupKey>;

/// (cardinality class, time range, step): the unit outcomes are aggregated by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub cardinality: u64,
    pub range: String,
    pub step: String,
    lookback_secs: i64,
    step_secs: i64,
}

impl GroupKey {
    pub fn new(cardinality: u64, bucket: &TimeRangeBucket) -> Self {
        Self {
            cardinality,
            range: bucket.range.clone(),
            step: bucket.step.clone(),
            lookback_secs: bucket.lookback_secs(),
            step_secs: bucket.step_secs(),
        }
    }

    /// Value a correct backend returns for any query in this group.
    pub fn expected_value(&self) -> String {
        self.cardinality.to_string()
    }

    pub fn lookback_secs(&self) -> i64 {
        self.lookback_secs
    }

    pub fn step_secs(&self) -> i64 {
        self.step_secs
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cardinality, self.range, self.step)
    }
}

/// Inputs for one synthesis call.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub size: i64,
    /// Pre-formatted matcher fragment, see [`crate::labels::format_labels`].
    pub labels: String,
    pub max_cardinality: u64,
}

/// One eligible (class, bucket) pair and how many queries it contributes.
#[derive(Debug, Clone)]
pub struct PlannedGroup {
    pub key: GroupKey,
    pub count: u64,
    bound: BoundTemplate,
}

impl PlannedGroup {
    pub fn instantiate(&self, instance: u64) -> String {
        self.bound.instantiate(instance)
    }
}

#[derive(Debug, Clone)]
pub struct Synthesizer {
    catalog: Arc<QueryCatalog>,
}

impl Synthesizer {
    pub fn new(catalog: impl Into<Arc<QueryCatalog>>) -> Self {
        Self {
            catalog: catalog.into(),
        }
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Every eligible (class, bucket) pair with its nominal query count.
    ///
    /// Classes above `max_cardinality`, classes without a template and
    /// buckets without a weight are skipped.
    pub fn plan(&self, request: &BatchRequest) -> Vec<PlannedGroup> {
        self.plan_filtered(request, |class| class <= request.max_cardinality)
    }

    pub(crate) fn plan_filtered(
        &self,
        request: &BatchRequest,
        eligible: impl Fn(u64) -> bool,
    ) -> Vec<PlannedGroup> {
        let catalog = &self.catalog;
        let mut groups = Vec::new();
        for bucket in catalog.buckets() {
            let Some(bucket_weight) = bucket.weight else {
                continue;
            };
            for (class, class_weight) in catalog.cardinality_classes() {
                if !eligible(class) {
                    continue;
                }
                let Some(template) = catalog.template(class) else {
                    continue;
                };
                groups.push(PlannedGroup {
                    key: GroupKey::new(class, bucket),
                    count: catalog.nominal_count(class_weight, bucket_weight, request.size),
                    bound: template.bind(&bucket.range, &bucket.step, &request.labels),
                });
            }
        }
        groups
    }

    /// Nominal count per group, keyed for display.
    pub fn planned_counts(&self, request: &BatchRequest) -> BTreeMap<GroupKey, u64> {
        self.plan(request)
            .into_iter()
            .map(|g| (g.key, g.count))
            .collect()
    }

    pub fn synthesize(&self, request: &BatchRequest) -> QuerySet {
        let mut rng = StdRng::from_os_rng();
        self.synthesize_with_rng(request, &mut rng)
    }

    pub fn synthesize_with_rng<R: Rng>(
        &self,
        request: &BatchRequest,
        rng: &mut R,
    ) -> QuerySet {
        let plan = self.plan(request);
        let nominal: u64 = plan.iter().map(|g| g.count).sum();
        let mut queries = QuerySet::with_capacity(nominal as usize);

        for group in plan {
            for _ in 0..group.count {
                let instance = rng.random_range(1..=group.count);
                queries.insert(group.instantiate(instance), group.key.clone());
            }
        }

        tracing::debug!(
            size = request.size,
            max_cardinality = request.max_cardinality,
            nominal,
            unique = queries.len(),
            "synthesized query batch"
        );
        queries
    }
}
