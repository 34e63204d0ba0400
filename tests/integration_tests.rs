//! Workspace-level integration tests: catalog files, synthesis, verification
//! and rule emission exercised together through the public API.

use querysynth_core::rules::{build_rule_groups, render_rule_file, RULES_PER_GROUP};
use querysynth_core::{verify, BatchRequest, Outcome, QueryCatalog, Synthesizer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;

const CUSTOM_CATALOG: &str = r#"{
  "templates": {
    "10": "count({__name__=~\"m_{instance}_.\",{labels}}[{range}s:{step}s])",
    "1000": "count({__name__=~\"m_{instance}_...\",{labels}}[{range}s:{step}s])"
  },
  "cardinality_weights": {"10": 3, "1000": 1},
  "steps": {"3600": "15", "600": "5"},
  "time_weights": {"3600": 1.0, "600": 2.0},
  "normalization": 1
}"#;

fn body_with_last(value: &str) -> String {
    format!(
        r#"{{"status":"success","data":{{"resultType":"matrix","result":[{{"metric":{{}},"values":[[1,"0"],[2,"{value}"]]}}]}}}}"#
    )
}

#[test]
fn custom_catalog_file_drives_synthesis() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CUSTOM_CATALOG.as_bytes()).unwrap();

    let catalog = QueryCatalog::from_path(file.path()).unwrap();
    assert_eq!(catalog.normalization(), 1);
    assert_eq!(catalog.buckets().len(), 2);

    let synth = Synthesizer::new(catalog);
    let request = BatchRequest {
        size: 1,
        labels: "env=\"ci\"".to_string(),
        max_cardinality: 1_000,
    };
    let counts = synth.planned_counts(&request);
    let by_name: Vec<(String, u64)> = counts.iter().map(|(k, c)| (k.to_string(), *c)).collect();
    assert_eq!(
        by_name,
        vec![
            ("10:3600:15".to_string(), 3),
            ("10:600:5".to_string(), 6),
            ("1000:3600:15".to_string(), 1),
            ("1000:600:5".to_string(), 2),
        ]
    );

    let queries = synth.synthesize_with_rng(&request, &mut StdRng::seed_from_u64(3));
    for (query, key) in &queries {
        assert!(query.contains("env=\"ci\""), "{query}");
        assert!(query.contains(&format!("[{}s:{}s]", key.range, key.step)), "{query}");
    }
}

#[test]
fn malformed_catalog_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let text = r#"{"templates": {"10": "count(up)"}, "cardinality_weights": {}, "steps": {}, "time_weights": {}}"#;
    file.write_all(text.as_bytes()).unwrap();
    assert!(QueryCatalog::from_path(file.path()).is_err());
}

#[test]
fn synthesized_queries_verify_against_their_own_class() {
    let synth = Synthesizer::new(QueryCatalog::read_default());
    let request = BatchRequest {
        size: 475,
        labels: String::new(),
        max_cardinality: 1_000_000,
    };
    let queries = synth.synthesize_with_rng(&request, &mut StdRng::seed_from_u64(11));
    assert!(!queries.is_empty());

    for key in queries.values() {
        let expected = key.expected_value();
        assert_eq!(verify(body_with_last(&expected).as_bytes(), &expected), Outcome::Matched);
        assert_eq!(
            verify(body_with_last("1").as_bytes(), &expected),
            Outcome::Mismatched { got: "1".to_string() }
        );
    }
}

#[test]
fn reference_rule_file_is_grouped_and_numbered() {
    let synth = Synthesizer::new(QueryCatalog::rules_default());
    let request = BatchRequest {
        size: 3300,
        labels: "job=\"rules\"".to_string(),
        max_cardinality: 4_000_001,
    };
    let groups = build_rule_groups(&synth, &request, &mut StdRng::seed_from_u64(5));
    assert!(!groups.is_empty());

    let mut next = 0u64;
    for group in &groups {
        assert!(group.rules.len() as u64 <= RULES_PER_GROUP, "{}", group.name);
        assert_eq!(group.name.split(':').count(), 4, "{}", group.name);
        for rule in &group.rules {
            assert_eq!(rule.record, format!("record:{next}"));
            assert!(rule.expr.contains("job=\"rules\""));
            next += 1;
        }
    }

    let text = render_rule_file(&groups);
    assert!(text.starts_with("groups:\n"));
    assert_eq!(text.matches("      - record: ").count() as u64, next);
    assert!(!text.contains("{instance}"));
}
