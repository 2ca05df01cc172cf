// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Core value types shared by the gap, backfill and scheduling paths.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One unit of work: a single court's document for a single day.
///
/// Identity is the `(date, entity)` pair. Gap detection never emits the
/// same pair twice for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub date: NaiveDate,
    pub entity: String,
}

impl WorkItem {
    pub fn new(date: NaiveDate, entity: impl Into<String>) -> Self {
        Self {
            date,
            entity: entity.into(),
        }
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.entity, self.date)
    }
}

/// Archive-side status of a `(date, entity)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// The document itself is in the archive
    Uploaded,
    /// An absence marker is in the archive
    Absent,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uploaded => write!(f, "uploaded"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Why an item was not attempted this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Not enough wall-clock budget left to start it
    Deadline,
    /// The archive circuit breaker refused the upload
    CircuitOpen,
    /// The entity is stopped and has nothing newer than its boundary
    StoppedEntity,
    /// Backfill found the date already resolved in the cache or listing
    AlreadyArchived,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deadline => write!(f, "deadline"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::StoppedEntity => write!(f, "stopped_entity"),
            Self::AlreadyArchived => write!(f, "already_archived"),
        }
    }
}

/// Which side of the pipeline a failure came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Upstream(String),
    Archive(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream(msg) => write!(f, "upstream: {}", msg),
            Self::Archive(msg) => write!(f, "archive: {}", msg),
        }
    }
}

/// Final result of processing one [`WorkItem`].
///
/// Produced exactly once per item per run and tallied into
/// [`crate::scheduler::Summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Uploaded,
    AbsentMarked,
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl Outcome {
    /// Stable label for logs and metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::AbsentMarked => "absent_marked",
            Self::Skipped(SkipReason::Deadline) => "skipped_deadline",
            Self::Skipped(SkipReason::CircuitOpen) => "skipped_circuit_open",
            Self::Skipped(SkipReason::StoppedEntity) => "skipped_stopped_entity",
            Self::Skipped(SkipReason::AlreadyArchived) => "already_archived",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether the item reached the network (counts toward the failure ratio)
    #[must_use]
    pub fn is_attempted(&self) -> bool {
        matches!(self, Self::Uploaded | Self::AbsentMarked | Self::Failed(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}
