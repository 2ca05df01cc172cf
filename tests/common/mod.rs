// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory collaborators with failure injection, shared by the
//! integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use djen_backup::archive::{Archive, Listing, Upload};
use djen_backup::upstream::{Absence, DocumentRef, Download, Lookup, Upstream};
use djen_backup::{ArchiveError, BackupConfig, Runner, UpstreamError};

pub const PREFIX: &str = "djen";

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn archived_name(date: NaiveDate, entity: &str, ext: &str) -> String {
    format!("{PREFIX}-{}-{entity}.{ext}", date.format("%Y-%m-%d"))
}

// =============================================================================
// Upstream
// =============================================================================

/// Upstream that has documents for an explicit set of `(date, entity)`
/// pairs and answers 404 for everything else.
#[derive(Default)]
pub struct FakeUpstream {
    documents: Mutex<BTreeSet<(NaiveDate, String)>>,
    malformed: Mutex<BTreeSet<(NaiveDate, String)>>,
    advertised: Mutex<Vec<String>>,
    /// Simulated latency of every lookup
    delay: Mutex<Option<Duration>>,
    pub lookups: AtomicU64,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, date: NaiveDate, entity: &str) -> Self {
        self.documents.lock().insert((date, entity.to_string()));
        self
    }

    pub fn with_malformed(self, date: NaiveDate, entity: &str) -> Self {
        self.malformed.lock().insert((date, entity.to_string()));
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn advertising(self, entities: &[&str]) -> Self {
        *self.advertised.lock() = codes(entities);
        self
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn lookup(&self, entity: &str, date: NaiveDate) -> Result<Lookup, UpstreamError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = (date, entity.to_string());
        if self.malformed.lock().contains(&key) {
            return Err(UpstreamError::Malformed("expected JSON, got HTML".into()));
        }
        if self.documents.lock().contains(&key) {
            Ok(Lookup::Found(DocumentRef {
                url: format!("mem://{entity}/{date}"),
            }))
        } else {
            Ok(Lookup::Absent(Absence::new(404, "Not Found")))
        }
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<Download, UpstreamError> {
        Ok(Download::Document(Bytes::from(format!("PK zip for {}", doc.url))))
    }

    async fn entity_codes(&self) -> Result<Vec<String>, UpstreamError> {
        Ok(self.advertised.lock().clone())
    }
}

// =============================================================================
// Archive
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub filename: String,
    pub payload: Bytes,
    pub content_md5: String,
}

/// Archive keeping files per date. Uploads become visible to listings.
#[derive(Default)]
pub struct FakeArchive {
    files: Mutex<BTreeMap<NaiveDate, Vec<String>>>,
    pub uploads: Mutex<Vec<StoredUpload>>,
    failing_dates: Mutex<BTreeSet<NaiveDate>>,
    fail_uploads: AtomicBool,
    pub list_calls: AtomicU64,
    pub upload_calls: AtomicU64,
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(self, date: NaiveDate, names: &[&str]) -> Self {
        self.files.lock().entry(date).or_default().extend(codes(names));
        self
    }

    /// Listing for `date` fails with a 503
    pub fn with_failing_listing(self, date: NaiveDate) -> Self {
        self.failing_dates.lock().insert(date);
        self
    }

    /// Every upload fails with a 503 (retries already exhausted)
    pub fn failing_uploads(self) -> Self {
        self.fail_uploads.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing_uploads(&self, failing: bool) {
        self.fail_uploads.store(failing, Ordering::SeqCst);
    }

    pub fn list_count(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploads.lock().iter().map(|u| u.filename.clone()).collect()
    }

    pub fn upload_named(&self, filename: &str) -> Option<StoredUpload> {
        self.uploads.lock().iter().find(|u| u.filename == filename).cloned()
    }
}

#[async_trait]
impl Archive for FakeArchive {
    async fn list(&self, date: NaiveDate) -> Result<Listing, ArchiveError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_dates.lock().contains(&date) {
            return Err(ArchiveError::Status { status: 503 });
        }
        Ok(match self.files.lock().get(&date) {
            Some(names) => Listing::Files(names.clone()),
            None => Listing::Missing,
        })
    }

    async fn upload(&self, upload: &Upload) -> Result<(), ArchiveError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ArchiveError::Status { status: 503 });
        }
        let filename = upload.filename(PREFIX);
        self.files.lock().entry(upload.date).or_default().push(filename.clone());
        self.uploads.lock().push(StoredUpload {
            filename,
            payload: upload.payload.clone(),
            content_md5: upload.content_md5(),
        });
        Ok(())
    }
}

// =============================================================================
// Runner helpers
// =============================================================================

pub fn test_config() -> BackupConfig {
    BackupConfig {
        workers: 4,
        ..Default::default()
    }
}

pub fn runner(config: BackupConfig, upstream: &Arc<FakeUpstream>, archive: &Arc<FakeArchive>) -> Runner {
    Runner::new(config, upstream.clone(), archive.clone())
}
