// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Gap detection: which `(date, entity)` pairs the archive still lacks.
//!
//! For each date:
//!
//! 1. If the state cache already knows every expected entity, the date has
//!    no gaps and the archive is not asked.
//! 2. Otherwise the archive listing is fetched. A missing container means
//!    every expected entity is a gap.
//! 3. Otherwise filenames are parsed into a covered set and
//!    `gaps = expected - covered`. Unparseable names are ignored.
//!
//! Listed statuses are merged into the cache (the archive wins). With
//! `force_recheck` step 1 is skipped.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{parse_filename, Archive, Listing};
use crate::error::ArchiveError;
use crate::state::StateCache;
use crate::{ItemStatus, WorkItem};

pub const DEFAULT_LISTING_CONCURRENCY: usize = 5;

/// Map listed filenames for `date` to per-entity statuses.
///
/// If an entity has both a document and an absence marker, the document
/// wins.
#[must_use]
pub fn parse_listing(prefix: &str, date: NaiveDate, names: &[String]) -> BTreeMap<String, ItemStatus> {
    let mut statuses = BTreeMap::new();
    for name in names {
        if let Some((entity, status)) = parse_filename(prefix, date, name) {
            statuses
                .entry(entity)
                .and_modify(|s| {
                    if status == ItemStatus::Uploaded {
                        *s = status;
                    }
                })
                .or_insert(status);
        }
    }
    statuses
}

/// `expected - covered`; `None` (container missing) covers nothing.
#[must_use]
pub fn compute_gaps(
    expected: &BTreeSet<String>,
    listed: Option<&BTreeMap<String, ItemStatus>>,
) -> BTreeSet<String> {
    match listed {
        None => expected.clone(),
        Some(listed) => expected
            .iter()
            .filter(|e| !listed.contains_key(*e))
            .cloned()
            .collect(),
    }
}

pub struct GapDetector {
    archive: Arc<dyn Archive>,
    state: Arc<StateCache>,
    prefix: String,
    force_recheck: bool,
    listing_concurrency: usize,
}

impl GapDetector {
    pub fn new(archive: Arc<dyn Archive>, state: Arc<StateCache>, prefix: impl Into<String>) -> Self {
        Self {
            archive,
            state,
            prefix: prefix.into(),
            force_recheck: false,
            listing_concurrency: DEFAULT_LISTING_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_force_recheck(mut self, force_recheck: bool) -> Self {
        self.force_recheck = force_recheck;
        self
    }

    #[must_use]
    pub fn with_listing_concurrency(mut self, concurrency: usize) -> Self {
        self.listing_concurrency = concurrency.max(1);
        self
    }

    /// Per-entity archive statuses for `date` (`None` if the container is
    /// missing). Whatever is listed is merged into the state cache.
    pub async fn archive_statuses(
        &self,
        date: NaiveDate,
    ) -> Result<Option<BTreeMap<String, ItemStatus>>, ArchiveError> {
        match self.archive.list(date).await? {
            Listing::Missing => {
                crate::metrics::record_listing("missing");
                Ok(None)
            }
            Listing::Files(names) => {
                crate::metrics::record_listing("archive");
                let statuses = parse_listing(&self.prefix, date, &names);
                self.state.merge_listing(date, &statuses);
                Ok(Some(statuses))
            }
        }
    }

    /// Entities from `expected` that still need work for `date`.
    pub async fn detect(
        &self,
        date: NaiveDate,
        expected: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ArchiveError> {
        if !self.force_recheck && self.state.covers(date, expected) {
            crate::metrics::record_listing("cache");
            debug!(%date, "All entities known from cache");
            return Ok(BTreeSet::new());
        }
        let listed = self.archive_statuses(date).await?;
        Ok(compute_gaps(expected, listed.as_ref()))
    }

    /// Gaps across `dates`, newest date first then entity code.
    ///
    /// At most `listing_concurrency` listings are in flight. A date whose
    /// listing fails is treated as entirely missing; uploads overwrite so
    /// redoing a present item is harmless.
    #[tracing::instrument(skip_all, fields(dates = dates.len(), entities = entities.len()))]
    pub async fn discover(&self, dates: &[NaiveDate], entities: &[String]) -> Vec<WorkItem> {
        let expected: BTreeSet<String> = entities.iter().cloned().collect();
        let mut dates = dates.to_vec();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.dedup();

        let expected_ref = &expected;
        let per_date: Vec<(NaiveDate, BTreeSet<String>)> = stream::iter(dates)
            .map(|date| async move {
                let gaps = match self.detect(date, expected_ref).await {
                    Ok(gaps) => gaps,
                    Err(e) => {
                        crate::metrics::record_listing("error");
                        warn!(%date, error = %e, "Archive listing failed, treating date as missing");
                        expected_ref.clone()
                    }
                };
                (date, gaps)
            })
            .buffered(self.listing_concurrency)
            .collect()
            .await;

        let items: Vec<WorkItem> = per_date
            .into_iter()
            .flat_map(|(date, gaps)| gaps.into_iter().map(move |entity| WorkItem::new(date, entity)))
            .collect();
        info!(gaps = items.len(), "Gap discovery complete");
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Upload;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[derive(Default)]
    struct ListingArchive {
        listings: Mutex<BTreeMap<NaiveDate, Listing>>,
        failing: Mutex<BTreeSet<NaiveDate>>,
        calls: AtomicUsize,
    }

    impl ListingArchive {
        fn with(self, date: NaiveDate, listing: Listing) -> Self {
            self.listings.lock().insert(date, listing);
            self
        }
    }

    #[async_trait]
    impl Archive for ListingArchive {
        async fn list(&self, date: NaiveDate) -> Result<Listing, ArchiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().contains(&date) {
                return Err(ArchiveError::Status { status: 503 });
            }
            Ok(self.listings.lock().get(&date).cloned().unwrap_or(Listing::Missing))
        }

        async fn upload(&self, _upload: &Upload) -> Result<(), ArchiveError> {
            Ok(())
        }
    }

    fn detector(archive: ListingArchive) -> (Arc<ListingArchive>, Arc<StateCache>, GapDetector) {
        let archive = Arc::new(archive);
        let state = Arc::new(StateCache::new());
        let detector = GapDetector::new(archive.clone(), state.clone(), "djen");
        (archive, state, detector)
    }

    #[test]
    fn test_parse_listing_prefers_document() {
        let d = day("2024-01-15");
        let names = codes(&[
            "djen-2024-01-15-TJSP.absent",
            "djen-2024-01-15-TJSP.zip",
            "djen-2024-01-15-TJRO.absent",
            "djen-2024-01-15_files.xml",
        ]);
        let statuses = parse_listing("djen", d, &names);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["TJSP"], ItemStatus::Uploaded);
        assert_eq!(statuses["TJRO"], ItemStatus::Absent);
    }

    #[tokio::test]
    async fn test_detect_cache_hit_skips_archive() {
        let d = day("2024-01-15");
        let (archive, state, detector) = detector(ListingArchive::default());
        state.mark(d, "TJSP", ItemStatus::Uploaded);
        state.mark(d, "TJRO", ItemStatus::Absent);

        let expected: BTreeSet<String> = codes(&["TJSP", "TJRO"]).into_iter().collect();
        let gaps = detector.detect(d, &expected).await.unwrap();
        assert!(gaps.is_empty());
        assert_eq!(archive.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detect_missing_container_is_all_gaps() {
        let d = day("2024-01-15");
        let (_, _, detector) = detector(ListingArchive::default());
        let expected: BTreeSet<String> = codes(&["TJSP", "TJRO"]).into_iter().collect();
        assert_eq!(detector.detect(d, &expected).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_detect_listing_merges_into_cache() {
        let d = day("2024-01-15");
        let archive = ListingArchive::default().with(d, Listing::Files(codes(&["djen-2024-01-15-TJSP.zip"])));
        let (_, state, detector) = detector(archive);

        let expected: BTreeSet<String> = codes(&["TJSP", "TJRO"]).into_iter().collect();
        let gaps = detector.detect(d, &expected).await.unwrap();
        assert_eq!(gaps.into_iter().collect::<Vec<_>>(), vec!["TJRO".to_string()]);
        assert_eq!(state.get(d, "TJSP"), Some(ItemStatus::Uploaded));
    }

    #[tokio::test]
    async fn test_force_recheck_ignores_cache() {
        let d = day("2024-01-15");
        let archive = ListingArchive::default().with(d, Listing::Files(vec![]));
        let archive = Arc::new(archive);
        let state = Arc::new(StateCache::new());
        state.mark(d, "TJSP", ItemStatus::Uploaded);
        let detector = GapDetector::new(archive.clone(), state, "djen").with_force_recheck(true);

        let expected: BTreeSet<String> = codes(&["TJSP"]).into_iter().collect();
        let gaps = detector.detect(d, &expected).await.unwrap();
        assert_eq!(gaps, expected);
        assert_eq!(archive.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discover_orders_newest_first_and_survives_errors() {
        let d1 = day("2024-01-14");
        let d2 = day("2024-01-15");
        let d3 = day("2024-01-16");
        let archive = ListingArchive::default()
            .with(d1, Listing::Files(codes(&["djen-2024-01-14-TJSP.zip", "djen-2024-01-14-TJRO.absent"])))
            .with(d2, Listing::Files(codes(&["djen-2024-01-15-TJSP.zip"])));
        archive.failing.lock().insert(d3);
        let (_, _, detector) = detector(archive);

        let items = detector.discover(&[d1, d3, d2, d2], &codes(&["TJSP", "TJRO"])).await;
        let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["TJRO@2024-01-16", "TJSP@2024-01-16", "TJRO@2024-01-15"]);
    }
}
