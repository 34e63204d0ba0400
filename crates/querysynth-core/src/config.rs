//! Read-path configuration.

use crate::error::{Error, Result};
use crate::labels::format_labels;
use crate::synth::BatchRequest;
use std::time::Duration;
use url::Url;

pub const DEFAULT_QUERY_URL: &str = "http://localhost:9090/api/v1/query_range";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Everything the query loop needs, as supplied by the operator.
#[derive(Debug, Clone)]
pub struct ReadConfig {
    /// Range-query endpoint, e.g. `http://host/api/v1/query_range`.
    pub url: Url,
    pub request_interval: Duration,
    pub size: i64,
    pub max_cardinality: u64,
    pub tenant: Option<String>,
    /// Raw `key=value` strings.
    pub const_labels: Vec<String>,
    pub bearer_token: Option<String>,
    pub request_timeout: Duration,
    pub max_in_flight: usize,
    /// Stop after this many batches; `None` runs until shutdown.
    pub max_batches: Option<u64>,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_QUERY_URL).expect("default query URL is valid"),
            request_interval: Duration::from_secs(30),
            size: 475,
            max_cardinality: 1_000_000,
            tenant: None,
            const_labels: Vec::new(),
            bearer_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_batches: None,
        }
    }
}

impl ReadConfig {
    /// Check invariants and fold blank optional strings into `None`.
    pub fn normalized(mut self) -> Result<Self> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "query URL must be http(s), got `{}`",
                self.url
            )));
        }
        if self.request_interval.is_zero() {
            return Err(Error::InvalidConfig("request interval must be > 0".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig("request timeout must be > 0".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig("max in-flight must be > 0".to_string()));
        }
        if self.max_batches == Some(0) {
            return Err(Error::InvalidConfig("max batches must be > 0 when set".to_string()));
        }
        self.tenant = non_blank(self.tenant);
        self.bearer_token = non_blank(self.bearer_token);
        // Surface malformed labels at startup rather than on the first tick.
        format_labels(&self.const_labels)?;
        Ok(self)
    }

    pub fn batch_request(&self) -> Result<BatchRequest> {
        Ok(BatchRequest {
            size: self.size,
            labels: format_labels(&self.const_labels)?,
            max_cardinality: self.max_cardinality,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_and_tenant_become_none() {
        let cfg = ReadConfig {
            bearer_token: Some(" ".to_string()),
            tenant: Some(String::new()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.bearer_token, None);
        assert_eq!(cfg.tenant, None);
    }

    #[test]
    fn real_token_is_kept() {
        let cfg = ReadConfig {
            bearer_token: Some("s3cret".to_string()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.bearer_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn malformed_label_is_rejected() {
        let err = ReadConfig {
            const_labels: vec!["nokey".to_string()],
            ..Default::default()
        }
        .normalized()
        .unwrap_err();
        assert!(matches!(err, Error::InvalidLabel(_)));
    }

    #[test]
    fn rejects_zero_limits() {
        let zero_flight = ReadConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(zero_flight.normalized().is_err());

        let zero_interval = ReadConfig {
            request_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_interval.normalized().is_err());
    }

    #[test]
    fn batch_request_formats_labels() {
        let cfg = ReadConfig {
            const_labels: vec!["env=prod".to_string(), "team=obs".to_string()],
            size: 10,
            max_cardinality: 100,
            ..Default::default()
        };
        let req = cfg.batch_request().unwrap();
        assert_eq!(req.labels, "env=\"prod\",team=\"obs\"");
        assert_eq!(req.size, 10);
        assert_eq!(req.max_cardinality, 100);
    }
}
