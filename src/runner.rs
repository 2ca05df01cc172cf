// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Run orchestration for both modes.
//!
//! Gap mode: discover gaps over a date range, then process every gap
//! through the worker pool. Backfill mode: one cursor-driven scan per
//! entity through the same pool. Both share one state cache, one archive
//! breaker and one deadline for the whole run.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::backfill::{BackfillEngine, BackfillReportSnapshot, CursorStore, ScanPlan};
use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::gap::GapDetector;
use crate::processor::ItemProcessor;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::scheduler::{Deadline, Summary, SummarySnapshot, WorkerPool};
use crate::state::StateCache;
use crate::upstream::Upstream;

/// Days covered by gap mode when no range is given, ending yesterday.
pub const DEFAULT_RANGE_DAYS: i64 = 7;

/// Dates from `end` down to `start`, newest first. Empty when `start > end`.
#[must_use]
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = end;
    while current >= start {
        dates.push(current);
        match current.pred_opt() {
            Some(prev) => current = prev,
            None => break,
        }
    }
    dates
}

/// `(start, end)` of the default gap-mode window relative to `today`.
#[must_use]
pub fn default_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = today - ChronoDuration::days(1);
    (end - ChronoDuration::days(DEFAULT_RANGE_DAYS - 1), end)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunReport {
    pub mode: &'static str,
    /// Work items (gap mode) or entities (backfill) queued
    pub planned: usize,
    pub summary: SummarySnapshot,
    pub backfill: Option<BackfillReportSnapshot>,
    pub exit_code: u8,
}

pub struct Runner {
    config: BackupConfig,
    upstream: Arc<dyn Upstream>,
    archive: Arc<dyn Archive>,
    state: Arc<StateCache>,
    breaker: Arc<CircuitBreaker>,
}

impl Runner {
    /// Build a runner, loading the state cache from `config.state_file`.
    pub fn new(config: BackupConfig, upstream: Arc<dyn Upstream>, archive: Arc<dyn Archive>) -> Self {
        let state = Arc::new(StateCache::load(config.state_file.as_deref()));
        Self::with_state(config, upstream, archive, state)
    }

    pub fn with_state(
        config: BackupConfig,
        upstream: Arc<dyn Upstream>,
        archive: Arc<dyn Archive>,
        state: Arc<StateCache>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new("archive", config.circuit_config()));
        Self {
            config,
            upstream,
            archive,
            state,
            breaker,
        }
    }

    #[must_use]
    pub fn state(&self) -> &Arc<StateCache> {
        &self.state
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.deadline_budget(), self.config.safety_margin())
    }

    fn gap_detector(&self) -> GapDetector {
        GapDetector::new(Arc::clone(&self.archive), Arc::clone(&self.state), self.config.item_prefix.clone())
            .with_force_recheck(self.config.force_recheck)
            .with_listing_concurrency(self.config.listing_concurrency)
    }

    fn processor(&self) -> ItemProcessor {
        ItemProcessor::new(
            Arc::clone(&self.upstream),
            Arc::clone(&self.archive),
            Arc::clone(&self.breaker),
            Arc::clone(&self.state),
        )
    }

    fn save_state(&self) -> Result<(), BackupError> {
        if let Some(path) = &self.config.state_file {
            let today = Utc::now().date_naive();
            self.state.save(path, today, self.config.state_ttl_days)?;
            info!(path = %path.display(), dates = self.state.date_count(), "State saved");
        }
        Ok(())
    }

    /// Discover and fill gaps for `dates` x `entities`.
    #[tracing::instrument(skip_all, fields(dates = dates.len(), entities = entities.len()))]
    pub async fn run_gaps(&self, dates: &[NaiveDate], entities: &[String]) -> Result<RunReport, BackupError> {
        let started = Instant::now();
        let deadline = self.deadline();
        let summary = Arc::new(Summary::new("gaps"));

        let work = self.gap_detector().discover(dates, entities).await;
        let planned = work.len();

        if self.config.dry_run {
            for item in &work {
                info!(entity = %item.entity, date = %item.date, "Dry run, would process");
            }
            info!(planned, "Dry run complete, nothing processed");
            return Ok(self.finish("gaps", planned, &summary, None, started));
        }

        let pool = WorkerPool::new(self.config.workers, deadline).with_max_items(self.config.max_items);
        let processor = Arc::new(self.processor());
        pool.run(work, Arc::clone(&summary), move |item| {
            let processor = Arc::clone(&processor);
            async move { vec![processor.process(&item).await] }
        })
        .await;

        self.save_state()?;
        Ok(self.finish("gaps", planned, &summary, None, started))
    }

    /// Backward scan of every entity from `start`.
    #[tracing::instrument(skip_all, fields(entities = entities.len(), %start))]
    pub async fn run_backfill(&self, start: NaiveDate, entities: Vec<String>) -> Result<RunReport, BackupError> {
        let started = Instant::now();
        let deadline = self.deadline();
        let summary = Arc::new(Summary::new("backfill"));
        let cursor_path = self.config.backfill_state_file.clone();
        let cursors = Arc::new(CursorStore::load(cursor_path.as_deref()));
        let planned = entities.len();

        if self.config.dry_run {
            for entity in &entities {
                let cursor = cursors.get(entity);
                match cursor.scan_plan(start, self.config.lower_bound) {
                    ScanPlan::Skip(cause) => info!(entity = %entity, ?cause, "Dry run, would skip"),
                    ScanPlan::Scan {
                        from,
                        reset_streak,
                        window_top,
                    } => {
                        info!(
                            entity = %entity,
                            %from,
                            reset_streak,
                            window_top = ?window_top,
                            streak = cursor.consecutive_empty_count,
                            "Dry run, would scan"
                        );
                    }
                }
            }
            return Ok(self.finish("backfill", planned, &summary, None, started));
        }

        let engine = Arc::new(
            BackfillEngine::new(
                cursors,
                Arc::new(self.gap_detector()),
                Arc::new(self.processor()),
                self.config.backfill_config(),
            )
            .with_cursor_path(cursor_path.clone()),
        );
        let pool = WorkerPool::new(self.config.workers, deadline).with_max_items(self.config.max_items);
        let report = engine.run(entities, start, &pool, Arc::clone(&summary)).await;

        if let Some(path) = &cursor_path {
            engine.cursors().save(path)?;
        }
        self.save_state()?;
        Ok(self.finish("backfill", planned, &summary, Some(report), started))
    }

    fn finish(
        &self,
        mode: &'static str,
        planned: usize,
        summary: &Summary,
        backfill: Option<BackfillReportSnapshot>,
        started: Instant,
    ) -> RunReport {
        let snapshot = summary.snapshot();
        let exit_code = snapshot.exit_code(self.config.max_failure_ratio);
        crate::metrics::record_run_duration(mode, started.elapsed());
        if snapshot.bucket_sum() != snapshot.total {
            warn!(%snapshot, "Summary buckets do not add up");
        }
        info!(
            mode,
            planned,
            total = snapshot.total,
            uploaded = snapshot.uploaded,
            absent_marked = snapshot.absent_marked,
            failed = snapshot.failed,
            skipped_deadline = snapshot.skipped_deadline,
            skipped_circuit_open = snapshot.skipped_circuit_open,
            skipped_stopped_entity = snapshot.skipped_stopped_entity,
            already_archived = snapshot.already_archived,
            failure_rate = snapshot.failure_rate(),
            circuit = %self.breaker.phase(),
            elapsed_s = started.elapsed().as_secs(),
            exit_code,
            "Run complete"
        );
        RunReport {
            mode,
            planned,
            summary: snapshot,
            backfill,
            exit_code,
        }
    }
}

/// Clear the stop flag and streak of `entity` in the cursor file at `path`.
/// Returns `false` when the entity has no cursor.
pub fn reset_entity(path: &Path, entity: &str) -> Result<bool, BackupError> {
    let cursors = CursorStore::load(Some(path));
    let unreadable: Vec<&str> = cursors.unreadable().collect();
    if !unreadable.is_empty() {
        warn!(?unreadable, path = %path.display(), "Unreadable cursor entries are kept unchanged");
    }
    if !cursors.reset(entity) {
        warn!(entity, path = %path.display(), "No cursor for entity, nothing to reset");
        return Ok(false);
    }
    cursors.save(path)?;
    info!(entity, path = %path.display(), "Backfill cursor reset");
    Ok(true)
}
