// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! reqwest client for the Internet Archive.
//!
//! Listing reads `GET {metadata}/metadata/{item}`; the archive answers `{}`
//! for items that do not exist. Uploads go through the S3-compatible
//! endpoint with `PUT {s3}/{item}/{filename}` and `x-archive-*` headers
//! that create the item on first write.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{item_identifier, Archive, Listing, Upload};
use crate::error::{ArchiveError, BackupError};
use crate::metrics::LatencyTimer;
use crate::resilience::retry::{retry, RetryConfig, RetryOutcome};

pub const DEFAULT_METADATA_URL: &str = "https://archive.org";
pub const DEFAULT_S3_URL: &str = "https://s3.us.archive.org";

const META_COLLECTION: &str = "opensource";
const META_MEDIATYPE: &str = "data";
const META_DESCRIPTION: &str =
    "Diario de Justica Eletronico Nacional - Judicial communications from Brazilian courts.";
const META_SUBJECT: &str = "brazilian-law;djen;legal;judiciary;open-data";
const META_CREATOR: &str = "CausaGanha";

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub metadata_url: String,
    pub s3_url: String,
    pub item_prefix: String,
    /// Full `authorization` header value (`LOW access:secret`)
    pub auth: String,
    pub query_retry: RetryConfig,
    pub upload_retry: RetryConfig,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ArchiveConfig {
    pub fn new(auth: impl Into<String>) -> Self {
        Self {
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            s3_url: DEFAULT_S3_URL.to_string(),
            item_prefix: "djen".to_string(),
            auth: auth.into(),
            query_retry: RetryConfig::query(),
            upload_retry: RetryConfig::upload(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct InternetArchive {
    client: reqwest::Client,
    config: ArchiveConfig,
}

impl InternetArchive {
    pub fn new(config: ArchiveConfig) -> Result<Self, BackupError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, mut config: ArchiveConfig) -> Self {
        config.metadata_url = config.metadata_url.trim_end_matches('/').to_string();
        config.s3_url = config.s3_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    #[must_use]
    pub fn item_prefix(&self) -> &str {
        &self.config.item_prefix
    }

    fn upload_url(&self, upload: &Upload) -> String {
        format!(
            "{}/{}/{}",
            self.config.s3_url,
            item_identifier(&self.config.item_prefix, upload.date),
            upload.filename(&self.config.item_prefix)
        )
    }
}

/// Headers for one S3 PUT.
pub fn upload_headers(date: NaiveDate, content_md5: &str, auth: &str) -> Result<HeaderMap, ArchiveError> {
    let date = date.format("%Y-%m-%d").to_string();
    let title = format!("DJEN Data - {}", date);
    let pairs: [(&'static str, &str); 11] = [
        ("content-md5", content_md5),
        ("x-archive-auto-make-bucket", "1"),
        ("x-archive-queue-derive", "0"),
        ("x-archive-meta-collection", META_COLLECTION),
        ("x-archive-meta-mediatype", META_MEDIATYPE),
        ("x-archive-meta-title", &title),
        ("x-archive-meta-description", META_DESCRIPTION),
        ("x-archive-meta-subject", META_SUBJECT),
        ("x-archive-meta-creator", META_CREATOR),
        ("x-archive-meta-date", &date),
        ("authorization", auth),
    ];

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| ArchiveError::InvalidRequest(format!("header {}: {}", name, e)))?;
        if name == AUTHORIZATION.as_str() {
            value.set_sensitive(true);
        }
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

/// Filenames from a metadata body, or `None` when the item does not exist.
fn parse_metadata(body: &[u8]) -> Result<Option<Vec<String>>, ArchiveError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ArchiveError::Malformed(e.to_string()))?;
    let Some(files) = value.get("files").and_then(serde_json::Value::as_array) else {
        return Ok(None);
    };
    Ok(Some(
        files
            .iter()
            .filter_map(|f| f.get("name").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect(),
    ))
}

#[async_trait]
impl Archive for InternetArchive {
    async fn list(&self, date: NaiveDate) -> Result<Listing, ArchiveError> {
        let url = format!(
            "{}/metadata/{}",
            self.config.metadata_url,
            item_identifier(&self.config.item_prefix, date)
        );
        let _timer = LatencyTimer::new("list");

        let response = match retry("list", &self.config.query_retry, || self.client.get(&url).send()).await? {
            RetryOutcome::NotFound(_) => return Ok(Listing::Missing),
            RetryOutcome::Completed(response) => response,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Status { status: status.as_u16() });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ArchiveError::Transient(e.to_string()))?;
        match parse_metadata(&body)? {
            Some(files) => {
                debug!(%date, files = files.len(), "Archive listing fetched");
                Ok(Listing::Files(files))
            }
            None => Ok(Listing::Missing),
        }
    }

    async fn upload(&self, upload: &Upload) -> Result<(), ArchiveError> {
        let url = self.upload_url(upload);
        let headers = upload_headers(upload.date, &upload.content_md5(), &self.config.auth)?;
        let _timer = LatencyTimer::new("upload");

        info!(
            date = %upload.date,
            entity = %upload.entity,
            kind = ?upload.kind,
            size = upload.payload.len(),
            "Archive upload start"
        );
        let outcome = retry("upload", &self.config.upload_retry, || {
            self.client
                .put(&url)
                .headers(headers.clone())
                .body(upload.payload.clone())
                .send()
        })
        .await?;

        let status = match outcome {
            RetryOutcome::NotFound(r) | RetryOutcome::Completed(r) => r.status().as_u16(),
        };
        if status >= 400 {
            error!(date = %upload.date, entity = %upload.entity, status, "Archive upload rejected");
            return Err(ArchiveError::Status { status });
        }
        info!(date = %upload.date, entity = %upload.entity, status, "Archive upload done");
        Ok(())
    }
}
