// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backfill scan loop.
//!
//! One job per entity. Each job walks dates downward from the cursor's
//! resume point and classifies every date:
//!
//! ```text
//!   state cache ──known──▶ Hit / Empty (AlreadyArchived)
//!        │ unknown
//!   archive listing ──listed──▶ Hit / Empty (AlreadyArchived)
//!        │ not listed / listing failed
//!   ItemProcessor ──▶ Uploaded=Hit, AbsentMarked=Empty, anything else=Error
//! ```
//!
//! Dates newer than the cursor's examined window come first; on reaching
//! the window the scan jumps below it and extends the streak. The job ends
//! at the lower bound, at a stopped cursor's boundary, at the per-run date
//! cap, at the deadline, on the first `Error` or when the cursor stops. The
//! cursor file is checkpointed after every entity.

use chrono::{Duration as ChronoDuration, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cursor::{Classification, CursorEffect, ScanPlan, SkipCause, DEFAULT_STOP_THRESHOLD};
use super::store::CursorStore;
use crate::error::BackupError;
use crate::gap::GapDetector;
use crate::processor::ItemProcessor;
use crate::scheduler::{Deadline, Summary, WorkerPool};
use crate::{ItemStatus, Outcome, SkipReason, WorkItem};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Consecutive empties that stop an entity
    pub stop_threshold: u32,
    /// No date older than this is ever scanned
    pub lower_bound: NaiveDate,
    /// Dates sent to the processor per entity per run, 0 = unlimited.
    /// Dates already archived do not count.
    pub max_dates_per_entity: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            lower_bound: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
            max_dates_per_entity: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct BackfillReport {
    entities_scanned: AtomicU64,
    dates_classified: AtomicU64,
    hits: AtomicU64,
    empties: AtomicU64,
    errors: AtomicU64,
    newly_stopped: AtomicU64,
    stops_invalidated: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReportSnapshot {
    pub entities_scanned: u64,
    pub dates_classified: u64,
    pub hits: u64,
    pub empties: u64,
    pub errors: u64,
    pub newly_stopped: u64,
    pub stops_invalidated: u64,
}

impl BackfillReport {
    fn classified(&self, class: Classification) {
        self.dates_classified.fetch_add(1, Ordering::Relaxed);
        let bucket = match class {
            Classification::Hit => &self.hits,
            Classification::Empty => &self.empties,
            Classification::Error => &self.errors,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_classification(class.as_str());
    }

    #[must_use]
    pub fn snapshot(&self) -> BackfillReportSnapshot {
        BackfillReportSnapshot {
            entities_scanned: self.entities_scanned.load(Ordering::Relaxed),
            dates_classified: self.dates_classified.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            empties: self.empties.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            newly_stopped: self.newly_stopped.load(Ordering::Relaxed),
            stops_invalidated: self.stops_invalidated.load(Ordering::Relaxed),
        }
    }
}

pub struct BackfillEngine {
    cursors: Arc<CursorStore>,
    gaps: Arc<GapDetector>,
    processor: Arc<ItemProcessor>,
    config: BackfillConfig,
    cursor_path: Option<PathBuf>,
    listed_dates: Mutex<BTreeSet<NaiveDate>>,
    report: BackfillReport,
}

impl BackfillEngine {
    pub fn new(
        cursors: Arc<CursorStore>,
        gaps: Arc<GapDetector>,
        processor: Arc<ItemProcessor>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            cursors,
            gaps,
            processor,
            config,
            cursor_path: None,
            listed_dates: Mutex::new(BTreeSet::new()),
            report: BackfillReport::default(),
        }
    }

    /// Checkpoint cursors to `path` after each entity.
    #[must_use]
    pub fn with_cursor_path(mut self, path: Option<PathBuf>) -> Self {
        self.cursor_path = path;
        self
    }

    #[must_use]
    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    #[must_use]
    pub fn report(&self) -> BackfillReportSnapshot {
        self.report.snapshot()
    }

    /// Scan every entity in `entities` from `start` downward through `pool`.
    /// Cursors are checkpointed per entity; the final save is the caller's.
    #[tracing::instrument(skip_all, fields(entities = entities.len(), %start))]
    pub async fn run(
        self: &Arc<Self>,
        entities: Vec<String>,
        start: NaiveDate,
        pool: &WorkerPool,
        summary: Arc<Summary>,
    ) -> BackfillReportSnapshot {
        let deadline = pool.deadline();
        let engine = Arc::clone(self);
        pool.run(entities, summary, move |entity: String| {
            let engine = Arc::clone(&engine);
            async move { engine.scan_entity(&entity, start, deadline).await }
        })
        .await;

        crate::metrics::set_stopped_entities(self.cursors.stopped_count());
        let report = self.report();
        info!(
            entities = report.entities_scanned,
            dates = report.dates_classified,
            hits = report.hits,
            empties = report.empties,
            errors = report.errors,
            newly_stopped = report.newly_stopped,
            stops_invalidated = report.stops_invalidated,
            "Backfill pass complete"
        );
        report
    }

    /// Scan one entity; returns the outcome of every date it touched.
    pub async fn scan_entity(&self, entity: &str, start: NaiveDate, deadline: Deadline) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        let (mut date, window_top) = match self.cursors.begin_scan(entity, start, self.config.lower_bound) {
            ScanPlan::Skip(SkipCause::Stopped) => {
                debug!(entity, %start, "Entity stopped, nothing newer than boundary");
                outcomes.push(Outcome::Skipped(SkipReason::StoppedEntity));
                return outcomes;
            }
            ScanPlan::Skip(SkipCause::LowerBound) => {
                debug!(entity, lower_bound = %self.config.lower_bound, "Entity already at lower bound");
                return outcomes;
            }
            ScanPlan::Skip(SkipCause::Unreadable) => {
                warn!(entity, "Cursor entry unreadable, entity not scanned");
                return outcomes;
            }
            ScanPlan::Scan {
                from,
                reset_streak,
                window_top,
            } => {
                if reset_streak {
                    info!(entity, %from, "Scan start not contiguous with cursor, streak restarted");
                }
                (from, window_top)
            }
        };
        // A scan that starts at `start` with nothing examined above it owns
        // the window top as soon as its first date resolves.
        let mut claim_top = window_top.is_none() && date == start;
        self.report.entities_scanned.fetch_add(1, Ordering::Relaxed);

        let mut scanned = 0usize;
        loop {
            if date < self.config.lower_bound {
                info!(entity, lower_bound = %self.config.lower_bound, "Reached lower bound");
                break;
            }
            if let Some(boundary) = self.cursors.get(entity).boundary() {
                if date <= boundary {
                    debug!(entity, %boundary, "Reached stop boundary");
                    break;
                }
            }
            if self.config.max_dates_per_entity > 0 && scanned >= self.config.max_dates_per_entity {
                debug!(entity, scanned, "Per-entity date cap reached");
                break;
            }
            if deadline.should_stop() {
                outcomes.push(Outcome::Skipped(SkipReason::Deadline));
                break;
            }

            let (class, outcome) = self.classify(entity, date).await;
            if outcome != Outcome::Skipped(SkipReason::AlreadyArchived) {
                scanned += 1;
            }
            self.report.classified(class);
            outcomes.push(outcome);

            let (cursor, effect) = self.cursors.apply(entity, date, class, self.config.stop_threshold);
            debug!(entity, %date, class = %class, streak = cursor.consecutive_empty_count, "Date classified");
            match effect {
                CursorEffect::Stopped => {
                    self.report.newly_stopped.fetch_add(1, Ordering::Relaxed);
                    info!(entity, %date, streak = cursor.consecutive_empty_count, "Entity stopped after consecutive empties");
                    break;
                }
                CursorEffect::StopInvalidated => {
                    self.report.stops_invalidated.fetch_add(1, Ordering::Relaxed);
                    info!(entity, %date, "Hit above stop boundary, entity resumed");
                }
                CursorEffect::Advanced | CursorEffect::Unchanged => {}
            }
            if class == Classification::Error {
                warn!(entity, %date, "Classification error, entity halted for this run");
                break;
            }
            if claim_top {
                self.cursors.extend_upper(entity, start);
                claim_top = false;
            }

            let Some(mut next) = date.pred_opt() else {
                break;
            };
            if let Some(top) = window_top {
                if date > top && next <= top {
                    // Everything newer than the window is examined now
                    self.cursors.extend_upper(entity, start);
                    let cursor = self.cursors.get(entity);
                    if cursor.stopped {
                        debug!(entity, "Newer dates examined, entity stays stopped");
                        break;
                    }
                    if let Some(lower) = cursor.lower_scanned_date.filter(|lower| next >= *lower) {
                        match lower.pred_opt() {
                            Some(below) => next = below,
                            None => break,
                        }
                        debug!(entity, %next, "Jumped below examined window");
                    }
                }
            }
            date = next;
        }

        if let Err(e) = self.checkpoint() {
            warn!(entity, error = %e, "Backfill cursor checkpoint failed");
        }
        outcomes
    }

    async fn classify(&self, entity: &str, date: NaiveDate) -> (Classification, Outcome) {
        if let Some(status) = self.processor.state().get(date, entity) {
            return known(status);
        }

        if self.listed_dates.lock().insert(date) {
            match self.gaps.archive_statuses(date).await {
                Ok(Some(statuses)) => {
                    if let Some(status) = statuses.get(entity) {
                        return known(*status);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    crate::metrics::record_listing("error");
                    self.listed_dates.lock().remove(&date);
                    warn!(entity, %date, error = %e, "Archive listing failed, processing date directly");
                }
            }
        }

        let outcome = self.processor.process(&WorkItem::new(date, entity)).await;
        let class = match &outcome {
            Outcome::Uploaded => Classification::Hit,
            Outcome::AbsentMarked => Classification::Empty,
            Outcome::Skipped(_) | Outcome::Failed(_) => Classification::Error,
        };
        (class, outcome)
    }

    fn checkpoint(&self) -> Result<(), BackupError> {
        match &self.cursor_path {
            Some(path) => self.cursors.save(path),
            None => Ok(()),
        }
    }
}

fn known(status: ItemStatus) -> (Classification, Outcome) {
    let class = match status {
        ItemStatus::Uploaded => Classification::Hit,
        ItemStatus::Absent => Classification::Empty,
    };
    (class, Outcome::Skipped(SkipReason::AlreadyArchived))
}

/// Newest date a backfill run considers when none is given.
#[must_use]
pub fn default_start(today: NaiveDate) -> NaiveDate {
    today - ChronoDuration::days(1)
}
