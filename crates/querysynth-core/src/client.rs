//! Execution client for the backend's range-query endpoint.

use crate::config::ReadConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Tenant header understood by Cortex/Mimir-style multi-tenant backends.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

const OWNED_PARAMS: [&str; 4] = ["query", "start", "end", "step"];

/// Runs one query and hands back the raw body.
///
/// An `Err` means nothing usable was received; callers record it as a
/// transport failure and never retry.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str, lookback_secs: i64, step_secs: i64) -> Result<Bytes>;
}

pub struct HttpQueryClient {
    client: Client,
    url: Url,
    bearer_token: Option<String>,
}

impl HttpQueryClient {
    pub fn new(config: &ReadConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(tenant) = non_blank(config.tenant.as_deref()) {
            let value = HeaderValue::from_str(tenant)
                .map_err(|e| Error::InvalidConfig(format!("invalid tenant `{tenant}`: {e}")))?;
            headers.insert(HeaderName::from_static("x-scope-orgid"), value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            bearer_token: non_blank(config.bearer_token.as_deref()).map(str::to_string),
        })
    }

    /// `<base>?query=Q&start=end-lookback&end=end&step=S`, replacing any of
    /// those parameters already present on the base URL.
    pub fn request_url(&self, query: &str, lookback_secs: i64, step_secs: i64, end: i64) -> Url {
        let mut url = self.url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !OWNED_PARAMS.contains(&k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs
                .append_pair("query", query)
                .append_pair("start", &(end - lookback_secs).to_string())
                .append_pair("end", &end.to_string())
                .append_pair("step", &step_secs.to_string());
        }
        url
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[async_trait]
impl QueryExecutor for HttpQueryClient {
    async fn execute(&self, query: &str, lookback_secs: i64, step_secs: i64) -> Result<Bytes> {
        let end = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let url = self.request_url(query, lookback_secs, step_secs, end);

        let mut request = self.client.get(url);
        if let Some(token) = self.bearer_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            tracing::debug!(%status, query, "query backend returned non-success status");
        }
        Ok(body)
    }
}
