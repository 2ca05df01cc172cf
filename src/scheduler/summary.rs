// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Run summary: one bucket per [`Outcome`], lock-free counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Outcome, SkipReason};

/// Default ceiling on `failed / attempted` before the run exits non-zero
pub const DEFAULT_MAX_FAILURE_RATIO: f64 = 0.5;

#[derive(Debug)]
pub struct Summary {
    mode: &'static str,
    total: AtomicU64,
    uploaded: AtomicU64,
    absent_marked: AtomicU64,
    skipped_deadline: AtomicU64,
    skipped_circuit_open: AtomicU64,
    skipped_stopped_entity: AtomicU64,
    already_archived: AtomicU64,
    failed: AtomicU64,
}

impl Summary {
    /// `mode` labels the outcome metrics (`gaps`, `backfill`)
    #[must_use]
    pub fn new(mode: &'static str) -> Self {
        Self {
            mode,
            total: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
            absent_marked: AtomicU64::new(0),
            skipped_deadline: AtomicU64::new(0),
            skipped_circuit_open: AtomicU64::new(0),
            skipped_stopped_entity: AtomicU64::new(0),
            already_archived: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Count one outcome into exactly one bucket.
    pub fn record(&self, outcome: &Outcome) {
        let bucket = match outcome {
            Outcome::Uploaded => &self.uploaded,
            Outcome::AbsentMarked => &self.absent_marked,
            Outcome::Skipped(SkipReason::Deadline) => &self.skipped_deadline,
            Outcome::Skipped(SkipReason::CircuitOpen) => &self.skipped_circuit_open,
            Outcome::Skipped(SkipReason::StoppedEntity) => &self.skipped_stopped_entity,
            Outcome::Skipped(SkipReason::AlreadyArchived) => &self.already_archived,
            Outcome::Failed(_) => &self.failed,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_outcome(self.mode, outcome);
    }

    #[must_use]
    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            total: self.total.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            absent_marked: self.absent_marked.load(Ordering::Relaxed),
            skipped_deadline: self.skipped_deadline.load(Ordering::Relaxed),
            skipped_circuit_open: self.skipped_circuit_open.load(Ordering::Relaxed),
            skipped_stopped_entity: self.skipped_stopped_entity.load(Ordering::Relaxed),
            already_archived: self.already_archived.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`Summary`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummarySnapshot {
    pub total: u64,
    pub uploaded: u64,
    pub absent_marked: u64,
    pub skipped_deadline: u64,
    pub skipped_circuit_open: u64,
    pub skipped_stopped_entity: u64,
    pub already_archived: u64,
    pub failed: u64,
}

impl SummarySnapshot {
    /// Items that reached the network. Skips are excluded.
    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.uploaded + self.absent_marked + self.failed
    }

    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped_deadline + self.skipped_circuit_open + self.skipped_stopped_entity + self.already_archived
    }

    /// `failed / attempted`, zero when nothing was attempted
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            return 0.0;
        }
        self.failed as f64 / attempted as f64
    }

    /// Process exit code: 1 when the failure rate exceeds `max_failure_ratio`
    #[must_use]
    pub fn exit_code(&self, max_failure_ratio: f64) -> u8 {
        u8::from(self.failure_rate() > max_failure_ratio)
    }

    /// Sum of every bucket, which must equal `total`
    #[must_use]
    pub fn bucket_sum(&self) -> u64 {
        self.attempted() + self.skipped()
    }
}

impl std::fmt::Display for SummarySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} uploaded={} absent_marked={} failed={} skipped_deadline={} skipped_circuit_open={} skipped_stopped_entity={} already_archived={}",
            self.total,
            self.uploaded,
            self.absent_marked,
            self.failed,
            self.skipped_deadline,
            self.skipped_circuit_open,
            self.skipped_stopped_entity,
            self.already_archived
        )
    }
}
