// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for a backup run.
//!
//! # Example
//!
//! ```
//! use djen_backup::BackupConfig;
//!
//! // Defaults match the scheduled CI job
//! let config = BackupConfig::default();
//! assert_eq!(config.workers, 8);
//! assert_eq!(config.deadline_minutes, 45);
//!
//! // TOML overrides, everything else defaulted
//! let config = BackupConfig::from_toml_str("workers = 2\nstop_threshold = 30").unwrap();
//! assert_eq!(config.workers, 2);
//! assert_eq!(config.stop_threshold, 30);
//! assert_eq!(config.item_prefix, "djen");
//! ```

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::http::{ArchiveConfig, DEFAULT_METADATA_URL, DEFAULT_S3_URL};
use crate::backfill::engine::BackfillConfig;
use crate::error::BackupError;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::{RetryConfig, DEFAULT_RETRYABLE_STATUSES};
use crate::upstream::http::{ProxyConfig, DEFAULT_PROXY_URL};

/// Configuration for a backup run.
///
/// All fields have defaults; a config file only needs the keys it changes.
/// CLI flags are applied on top by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock budget for the whole run
    #[serde(default = "default_deadline_minutes")]
    pub deadline_minutes: u64,
    /// No new item starts with less than this left
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,

    /// Queue cap (0 = unlimited)
    #[serde(default)]
    pub max_items: usize,

    /// Gap-mode state cache file
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Backfill cursor file
    #[serde(default)]
    pub backfill_state_file: Option<PathBuf>,
    /// Days of state kept (0 = keep everything)
    #[serde(default = "default_state_ttl_days")]
    pub state_ttl_days: u32,

    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default = "default_s3_url")]
    pub s3_url: String,
    #[serde(default = "default_item_prefix")]
    pub item_prefix: String,

    /// Ignore the state cache and list every date
    #[serde(default)]
    pub force_recheck: bool,
    /// Archive listings in flight during discovery
    #[serde(default = "default_listing_concurrency")]
    pub listing_concurrency: usize,

    /// Backfill: consecutive empties that stop an entity
    #[serde(default = "default_stop_threshold")]
    pub stop_threshold: u32,
    /// Backfill: oldest date ever scanned
    #[serde(default = "default_lower_bound")]
    pub lower_bound: NaiveDate,
    /// Backfill: dates per entity per run (0 = unlimited)
    #[serde(default)]
    pub max_dates_per_entity: usize,

    /// Exit non-zero when failed / attempted exceeds this
    #[serde(default = "default_max_failure_ratio")]
    pub max_failure_ratio: f64,

    /// Retry settings
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_upload_retry_max_delay_ms")]
    pub upload_retry_max_delay_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,

    /// Archive circuit breaker
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_recovery_secs")]
    pub circuit_recovery_secs: u64,
    #[serde(default = "default_circuit_max_recovery_secs")]
    pub circuit_max_recovery_secs: u64,

    /// HTTP timeouts
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Discover and report, never download or upload
    #[serde(default)]
    pub dry_run: bool,
}

fn default_workers() -> usize { 8 }
fn default_deadline_minutes() -> u64 { 45 }
fn default_safety_margin_secs() -> u64 { 30 }
fn default_state_ttl_days() -> u32 { 90 }
fn default_proxy_url() -> String { DEFAULT_PROXY_URL.to_string() }
fn default_metadata_url() -> String { DEFAULT_METADATA_URL.to_string() }
fn default_s3_url() -> String { DEFAULT_S3_URL.to_string() }
fn default_item_prefix() -> String { "djen".to_string() }
fn default_listing_concurrency() -> usize { crate::gap::DEFAULT_LISTING_CONCURRENCY }
fn default_stop_threshold() -> u32 { crate::backfill::DEFAULT_STOP_THRESHOLD }
fn default_lower_bound() -> NaiveDate { NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN) }
fn default_max_failure_ratio() -> f64 { crate::scheduler::DEFAULT_MAX_FAILURE_RATIO }
fn default_retry_initial_delay_ms() -> u64 { 1_000 }
fn default_retry_max_delay_ms() -> u64 { 16_000 }
fn default_upload_retry_max_delay_ms() -> u64 { 60_000 }
fn default_retry_max_attempts() -> u32 { 4 }
fn default_max_retry_after_secs() -> u64 { 300 }
fn default_circuit_failure_threshold() -> u32 { 5 }
fn default_circuit_recovery_secs() -> u64 { 60 }
fn default_circuit_max_recovery_secs() -> u64 { 300 }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_request_timeout_secs() -> u64 { 120 }

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            deadline_minutes: default_deadline_minutes(),
            safety_margin_secs: default_safety_margin_secs(),
            max_items: 0,
            state_file: None,
            backfill_state_file: None,
            state_ttl_days: default_state_ttl_days(),
            proxy_url: default_proxy_url(),
            metadata_url: default_metadata_url(),
            s3_url: default_s3_url(),
            item_prefix: default_item_prefix(),
            force_recheck: false,
            listing_concurrency: default_listing_concurrency(),
            stop_threshold: default_stop_threshold(),
            lower_bound: default_lower_bound(),
            max_dates_per_entity: 0,
            max_failure_ratio: default_max_failure_ratio(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            upload_retry_max_delay_ms: default_upload_retry_max_delay_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            max_retry_after_secs: default_max_retry_after_secs(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_recovery_secs: default_circuit_recovery_secs(),
            circuit_max_recovery_secs: default_circuit_max_recovery_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            dry_run: false,
        }
    }
}

impl BackupConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, BackupError> {
        let config: Self = toml::from_str(raw).map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, BackupError> {
        let raw = std::fs::read_to_string(path).map_err(|source| BackupError::StateIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), BackupError> {
        let fail = |msg: &str| Err(BackupError::Config(msg.to_string()));
        if self.workers == 0 {
            return fail("workers must be at least 1");
        }
        if self.deadline_minutes == 0 {
            return fail("deadline_minutes must be at least 1");
        }
        if self.stop_threshold == 0 {
            return fail("stop_threshold must be at least 1");
        }
        if self.retry_max_attempts == 0 {
            return fail("retry_max_attempts must be at least 1");
        }
        if self.circuit_failure_threshold == 0 {
            return fail("circuit_failure_threshold must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return fail("max_failure_ratio must be within [0, 1]");
        }
        if self.item_prefix.trim().is_empty() {
            return fail("item_prefix must not be empty");
        }
        Ok(())
    }

    #[must_use]
    pub fn deadline_budget(&self) -> Duration {
        Duration::from_secs(self.deadline_minutes * 60)
    }

    #[must_use]
    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }

    #[must_use]
    pub fn query_retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            factor: 2.0,
            max_attempts: self.retry_max_attempts,
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    #[must_use]
    pub fn upload_retry(&self) -> RetryConfig {
        RetryConfig {
            max_delay: Duration::from_millis(self.upload_retry_max_delay_ms),
            ..self.query_retry()
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            recovery_timeout: Duration::from_secs(self.circuit_recovery_secs),
            max_recovery_timeout: Duration::from_secs(self.circuit_max_recovery_secs),
        }
    }

    #[must_use]
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            base_url: self.proxy_url.clone(),
            retry: self.query_retry(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    #[must_use]
    pub fn archive_config(&self, auth: impl Into<String>) -> ArchiveConfig {
        ArchiveConfig {
            metadata_url: self.metadata_url.clone(),
            s3_url: self.s3_url.clone(),
            item_prefix: self.item_prefix.clone(),
            auth: auth.into(),
            query_retry: self.query_retry(),
            upload_retry: self.upload_retry(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    #[must_use]
    pub fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig {
            stop_threshold: self.stop_threshold,
            lower_bound: self.lower_bound,
            max_dates_per_entity: self.max_dates_per_entity,
        }
    }
}
