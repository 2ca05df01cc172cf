// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Processing of one `(date, entity)` item.
//!
//! ```text
//! breaker permit ──rejected──▶ Skipped(CircuitOpen)
//!       │
//!  upstream.download ──error──▶ Failed(Upstream)      (permit abandoned)
//!       │
//!   Document / Absent
//!       │
//!  archive.upload ──error──▶ Failed(Archive)          (breaker failure)
//!       │
//!  state.mark ─▶ Uploaded / AbsentMarked              (breaker success)
//! ```
//!
//! Retries live inside the collaborators, so a breaker failure here means
//! the upload already exhausted its retry budget.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::archive::{Archive, Upload};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::state::StateCache;
use crate::upstream::{Download, Upstream};
use crate::{FailureReason, ItemStatus, Outcome, SkipReason, WorkItem};

pub struct ItemProcessor {
    upstream: Arc<dyn Upstream>,
    archive: Arc<dyn Archive>,
    breaker: Arc<CircuitBreaker>,
    state: Arc<StateCache>,
}

impl ItemProcessor {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        archive: Arc<dyn Archive>,
        breaker: Arc<CircuitBreaker>,
        state: Arc<StateCache>,
    ) -> Self {
        Self {
            upstream,
            archive,
            breaker,
            state,
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn state(&self) -> &StateCache {
        &self.state
    }

    #[must_use]
    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.archive
    }

    pub async fn process(&self, item: &WorkItem) -> Outcome {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                debug!(entity = %item.entity, date = %item.date, reason = %e, "Skipped, archive circuit open");
                return Outcome::Skipped(SkipReason::CircuitOpen);
            }
        };

        let upload = match self.upstream.download(&item.entity, item.date).await {
            Ok(Download::Document(bytes)) => Upload::document(item.date, &item.entity, bytes),
            Ok(Download::Absent(absence)) => {
                info!(
                    entity = %item.entity,
                    date = %item.date,
                    status_code = absence.status_code,
                    reason = %absence.reason,
                    "No upstream document, marking absent"
                );
                match Upload::absence_marker(item.date, &item.entity, &absence, Utc::now()) {
                    Ok(upload) => upload,
                    Err(e) => return Outcome::Failed(FailureReason::Archive(e.to_string())),
                }
            }
            Err(e) => {
                error!(entity = %item.entity, date = %item.date, error = %e, "Upstream download failed");
                return Outcome::Failed(FailureReason::Upstream(e.to_string()));
            }
        };

        match self.archive.upload(&upload).await {
            Ok(()) => {
                permit.record_success();
                let status = upload.kind.status();
                self.state.mark(item.date, &item.entity, status);
                match status {
                    ItemStatus::Uploaded => Outcome::Uploaded,
                    ItemStatus::Absent => Outcome::AbsentMarked,
                }
            }
            Err(e) => {
                permit.record_failure();
                error!(entity = %item.entity, date = %item.date, error = %e, "Archive upload failed");
                Outcome::Failed(FailureReason::Archive(e.to_string()))
            }
        }
    }
}
