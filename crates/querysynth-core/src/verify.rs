//! Response verification.
//!
//! Only the last point of the first series matters: the synthesized queries
//! are shaped so a correct backend reports the cardinality class there.

use serde::Deserialize;
use std::collections::HashMap;

/// Prometheus-style query response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Option<ResponseData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseData {
    #[serde(default, rename = "resultType")]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<Series>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<(serde_json::Value, serde_json::Value)>,
}

/// Classification of one executed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Matched,
    /// Data came back but the last value was not the expected one.
    Mismatched { got: String },
    /// No usable data: missing `data`, no series, no points, or bad JSON.
    Empty,
    /// The request itself failed; no bytes were received.
    TransportFailure { error: String },
}

impl Outcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Outcome::Matched)
    }

    /// Counted against the failure counter: anything that is not a match.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Mismatched { .. } | Outcome::Empty | Outcome::TransportFailure { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Matched => "matched",
            Outcome::Mismatched { .. } => "mismatched",
            Outcome::Empty => "empty",
            Outcome::TransportFailure { .. } => "transport_failure",
        }
    }
}

/// Last value of the first series, rendered as a string.
pub fn last_value(response: &QueryResponse) -> Option<String> {
    let series = response.data.as_ref()?.result.first()?;
    let (_, value) = series.values.last()?;
    Some(match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Classify a raw response body against the expected value.
pub fn verify(body: &[u8], expected: &str) -> Outcome {
    let response: QueryResponse = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable query response");
            return Outcome::Empty;
        }
    };
    match last_value(&response) {
        None => Outcome::Empty,
        Some(got) if got == expected => Outcome::Matched,
        Some(got) => Outcome::Mismatched { got },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_last_point_of_first_series() {
        let body = br#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{},"values":[[1,"99"],[2,"100"]]},
            {"metric":{},"values":[[1,"7"]]}
        ]}}"#;
        assert_eq!(verify(body, "100"), Outcome::Matched);
    }

    #[test]
    fn stub_envelope_without_metric_matches() {
        let body = br#"{"status":"success","data":{"result":[{"values":[[0,"100"]]}]}}"#;
        assert_eq!(verify(body, "100"), Outcome::Matched);
    }

    #[test]
    fn earlier_points_do_not_count() {
        let body = br#"{"status":"success","data":{"result":[{"values":[[1,"100"],[2,"98"]]}]}}"#;
        assert_eq!(
            verify(body, "100"),
            Outcome::Mismatched {
                got: "98".to_string()
            }
        );
    }

    #[test]
    fn empty_shapes_are_empty() {
        for body in [
            br#"{"status":"success"}"#.as_slice(),
            br#"{"status":"success","data":null}"#,
            br#"{"status":"success","data":{"result":[]}}"#,
            br#"{"status":"success","data":{"result":[{"values":[]}]}}"#,
            br#"{"status":"error","errorType":"bad_data","error":"parse error"}"#,
        ] {
            assert_eq!(verify(body, "10"), Outcome::Empty);
        }
    }

    #[test]
    fn malformed_json_is_empty_not_panic() {
        assert_eq!(verify(b"<html>502 Bad Gateway</html>", "10"), Outcome::Empty);
        assert_eq!(verify(b"", "10"), Outcome::Empty);
        assert_eq!(verify(br#"{"data":{"result":[{"values":[[1]]}]}}"#, "10"), Outcome::Empty);
    }

    #[test]
    fn numeric_value_is_compared_textually() {
        let body = br#"{"data":{"result":[{"values":[[0,10]]}]}}"#;
        assert_eq!(verify(body, "10"), Outcome::Matched);
    }

    #[test]
    fn failure_folding() {
        assert!(Outcome::Empty.is_failure());
        assert!(Outcome::TransportFailure { error: "x".into() }.is_failure());
        assert!(Outcome::Mismatched { got: "1".into() }.is_failure());
        assert!(!Outcome::Mismatched { got: "1".into() }.is_match());
        assert!(Outcome::Matched.is_match());
    }
}
