// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! reqwest client for the DJEN proxy.
//!
//! - `GET {base}/api/v1/caderno/{entity}/{date}/D` → `{"url": "..."}`
//! - `GET {url}` → document bytes
//! - `GET {base}/api/v1/comunicacao/tribunal` → `[{"instituicoes": [{"sigla": "..."}]}]`
//!
//! The proxy occasionally answers 400 for requests that succeed on retry,
//! so lookups opt 400 into the retryable set.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Absence, DocumentRef, Download, Lookup, Upstream};
use crate::error::{BackupError, UpstreamError};
use crate::metrics::LatencyTimer;
use crate::resilience::retry::{retry, RetryConfig, RetryOutcome};

/// Stable Cloud Run deployment of the proxy
pub const DEFAULT_PROXY_URL: &str = "https://djen-proxy-mhgmawcn3a-rj.a.run.app";

const MISSING_URL_REASON: &str = "Empty or missing URL field";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub base_url: String,
    pub retry: RetryConfig,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROXY_URL.to_string(),
            retry: RetryConfig::query(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
    lookup_retry: RetryConfig,
    fetch_retry: RetryConfig,
}

#[derive(Deserialize)]
struct TribunalGroup {
    #[serde(default)]
    instituicoes: Vec<Institution>,
}

#[derive(Deserialize)]
struct Institution {
    #[serde(default)]
    sigla: Option<String>,
}

impl ProxyClient {
    pub fn new(config: ProxyConfig) -> Result<Self, BackupError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, &config.base_url, config.retry))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            lookup_retry: retry.clone().also_retry(400),
            fetch_retry: retry,
        }
    }

    fn lookup_url(&self, entity: &str, date: NaiveDate) -> String {
        format!("{}/api/v1/caderno/{}/{}/D", self.base_url, entity, date.format("%Y-%m-%d"))
    }
}

/// Interpret a 2xx lookup body.
fn parse_lookup(status: u16, body: &[u8]) -> Result<Lookup, UpstreamError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(UpstreamError::Malformed("lookup body is not a JSON object".into()));
    };
    match object.get("url").and_then(serde_json::Value::as_str) {
        Some(url) if !url.is_empty() => Ok(Lookup::Found(DocumentRef { url: url.to_string() })),
        _ => Ok(Lookup::Absent(Absence::new(status, MISSING_URL_REASON))),
    }
}

fn parse_entity_codes(body: &[u8]) -> Result<Vec<String>, UpstreamError> {
    let groups: Vec<TribunalGroup> =
        serde_json::from_slice(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    Ok(groups
        .into_iter()
        .flat_map(|g| g.instituicoes)
        .filter_map(|i| i.sigla)
        .filter(|s| !s.is_empty())
        .collect())
}

#[async_trait]
impl Upstream for ProxyClient {
    async fn lookup(&self, entity: &str, date: NaiveDate) -> Result<Lookup, UpstreamError> {
        let url = self.lookup_url(entity, date);
        let _timer = LatencyTimer::new("lookup");

        let response = match retry("lookup", &self.lookup_retry, || self.client.get(&url).send()).await? {
            RetryOutcome::NotFound(_) => {
                debug!(entity, %date, "Lookup returned 404");
                return Ok(Lookup::Absent(Absence::new(404, "Not Found")));
            }
            RetryOutcome::Completed(response) => response,
        };

        let status = response.status();
        if !status.is_success() {
            warn!(entity, %date, status = status.as_u16(), "Lookup failed");
            return Err(UpstreamError::Status { status: status.as_u16() });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transient(e.to_string()))?;
        parse_lookup(status.as_u16(), &body)
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<Download, UpstreamError> {
        let _timer = LatencyTimer::new("fetch");

        let response = match retry("fetch", &self.fetch_retry, || self.client.get(&doc.url).send()).await? {
            RetryOutcome::NotFound(_) => {
                return Ok(Download::Absent(Absence::new(404, "Document download 404")));
            }
            RetryOutcome::Completed(response) => response,
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %doc.url, status = status.as_u16(), "Document fetch failed");
            return Err(UpstreamError::Status { status: status.as_u16() });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transient(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Download::Absent(Absence::new(status.as_u16(), "Empty document")));
        }
        debug!(url = %doc.url, size = bytes.len(), "Document fetched");
        Ok(Download::Document(bytes))
    }

    async fn entity_codes(&self) -> Result<Vec<String>, UpstreamError> {
        let url = format!("{}/api/v1/comunicacao/tribunal", self.base_url);
        let _timer = LatencyTimer::new("entity_list");

        let response = match retry("entity_list", &self.fetch_retry, || self.client.get(&url).send()).await? {
            RetryOutcome::NotFound(_) => return Err(UpstreamError::Status { status: 404 }),
            RetryOutcome::Completed(response) => response,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status { status: status.as_u16() });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transient(e.to_string()))?;
        parse_entity_codes(&body)
    }
}
