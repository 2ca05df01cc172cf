// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity backfill cursor and its transition rules.
//!
//! The cursor walks backward in time. Each scanned date is classified as a
//! [`Classification::Hit`], [`Classification::Empty`] or
//! [`Classification::Error`] and folded in with [`EntityCursor::apply`]:
//!
//! | class | below the lower edge | newer than the lower edge |
//! |-------|----------------------|---------------------------|
//! | Hit   | streak = 0, lower = date | stopped: stop cleared, streak = 0, lower = date; otherwise last hit only |
//! | Empty | streak += 1, lower = date; at threshold stop with boundary = date | unchanged |
//! | Error | unchanged | unchanged |
//!
//! `[lower_scanned_date, upper_scanned_date]` is the window already
//! examined. Each run first classifies the dates newer than the window,
//! then jumps below it and extends the streak from `lower - 1`. Once
//! stopped, the cursor never moves past the boundary unless one of those
//! newer dates is a Hit.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive empty days after which an entity is considered dormant
pub const DEFAULT_STOP_THRESHOLD: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Document archived (already, or this run)
    Hit,
    /// Upstream authoritatively has nothing for the date
    Empty,
    /// Says nothing about existence; the date stays unresolved
    Error,
}

impl Classification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What [`EntityCursor::apply`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEffect {
    /// Progress recorded, keep scanning
    Advanced,
    /// Streak reached the threshold on this date
    Stopped,
    /// A Hit newer than the boundary cleared an earlier stop
    StopInvalidated,
    /// No change to the streak or the lower edge (Error, or a date newer
    /// than the lower edge)
    Unchanged,
}

/// Why a scan was not started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    /// Stopped and nothing newer than the boundary to re-examine
    Stopped,
    /// Already scanned down to the absolute lower bound
    LowerBound,
    /// Stored entry could not be parsed
    Unreadable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPlan {
    Skip(SkipCause),
    Scan {
        /// First (newest) date to classify
        from: NaiveDate,
        /// Scan start is not contiguous with the previous run's lower edge
        reset_streak: bool,
        /// Top of the examined window when `from` is newer than it. The scan
        /// jumps below the window on reaching it.
        window_top: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCursor {
    #[serde(default)]
    pub lower_scanned_date: Option<NaiveDate>,
    /// Newest date examined by a run that reached the window below it
    #[serde(default)]
    pub upper_scanned_date: Option<NaiveDate>,
    #[serde(default)]
    pub consecutive_empty_count: u32,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub stop_boundary_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_hit_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_result: Option<Classification>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl EntityCursor {
    /// Fold one classified date into the cursor.
    #[must_use]
    pub fn apply(
        &self,
        date: NaiveDate,
        class: Classification,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> (Self, CursorEffect) {
        let mut next = self.clone();
        next.last_result = Some(class);
        next.last_checked_at = Some(now);

        let newer = self.lower_scanned_date.is_some_and(|lower| date >= lower);
        let effect = match class {
            Classification::Hit if newer && !next.stopped => {
                next.last_hit_date = Some(date);
                CursorEffect::Unchanged
            }
            Classification::Hit => {
                let was_stopped = next.stopped;
                next.stopped = false;
                next.stop_boundary_date = None;
                next.consecutive_empty_count = 0;
                next.lower_scanned_date = Some(date);
                next.last_hit_date = Some(date);
                if was_stopped {
                    CursorEffect::StopInvalidated
                } else {
                    CursorEffect::Advanced
                }
            }
            Classification::Empty if newer || next.stopped => CursorEffect::Unchanged,
            Classification::Empty => {
                next.consecutive_empty_count = next.consecutive_empty_count.saturating_add(1);
                next.lower_scanned_date = Some(date);
                if next.consecutive_empty_count >= threshold {
                    next.stopped = true;
                    next.stop_boundary_date = Some(date);
                    CursorEffect::Stopped
                } else {
                    CursorEffect::Advanced
                }
            }
            Classification::Error => CursorEffect::Unchanged,
        };
        (next, effect)
    }

    /// Boundary below which a stopped cursor must not scan.
    #[must_use]
    pub fn boundary(&self) -> Option<NaiveDate> {
        if self.stopped {
            self.stop_boundary_date.or(self.lower_scanned_date)
        } else {
            None
        }
    }

    /// Newest date of the examined window.
    #[must_use]
    pub fn examined_top(&self) -> Option<NaiveDate> {
        match (self.lower_scanned_date, self.upper_scanned_date) {
            (Some(lower), Some(upper)) => Some(lower.max(upper)),
            (lower, upper) => lower.or(upper),
        }
    }

    /// Where this run should start scanning, given the newest candidate
    /// date `start` and the absolute `lower_bound`.
    #[must_use]
    pub fn scan_plan(&self, start: NaiveDate, lower_bound: NaiveDate) -> ScanPlan {
        let top = self.examined_top();
        if let Some(boundary) = self.boundary() {
            let top = top.map_or(boundary, |top| top.max(boundary));
            if start <= top || start < lower_bound {
                return ScanPlan::Skip(SkipCause::Stopped);
            }
            return ScanPlan::Scan {
                from: start,
                reset_streak: false,
                window_top: Some(top),
            };
        }

        let (from, reset_streak, window_top) = match (top, self.lower_scanned_date) {
            (Some(top), _) if start > top => (start, false, Some(top)),
            (Some(_), Some(lower)) => {
                let next_older = lower - ChronoDuration::days(1);
                if start < next_older {
                    (start, true, None)
                } else {
                    (next_older, false, None)
                }
            }
            _ => (start, false, None),
        };
        if from < lower_bound {
            return ScanPlan::Skip(SkipCause::LowerBound);
        }
        ScanPlan::Scan {
            from,
            reset_streak,
            window_top,
        }
    }

    /// Record that every date from the window up to `date` was examined.
    pub fn extend_upper(&mut self, date: NaiveDate) {
        self.upper_scanned_date = self.upper_scanned_date.max(Some(date));
    }

    /// Manual reset: clears the stop and the streak, keeps the lower edge.
    pub fn reset(&mut self) {
        self.stopped = false;
        self.stop_boundary_date = None;
        self.consecutive_empty_count = 0;
    }
}
