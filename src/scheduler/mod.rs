// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded worker pool with a wall-clock deadline.
//!
//! `workers` tasks drain one shared queue. Before starting a job a worker
//! checks the [`Deadline`]; if less than the safety margin remains, the job
//! is recorded as [`SkipReason::Deadline`] instead of run. Jobs already in
//! flight always finish. Every queued job is accounted exactly once.
//!
//! The pool is generic over the job type: gap mode queues
//! [`crate::WorkItem`]s, backfill mode queues entity codes so each cursor
//! is owned by one task.

pub mod summary;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::{Outcome, SkipReason};

pub use summary::{Summary, SummarySnapshot, DEFAULT_MAX_FAILURE_RATIO};

pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Point in time after which no new work starts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    safety_margin: Duration,
}

impl Deadline {
    #[must_use]
    pub fn after(budget: Duration, safety_margin: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            safety_margin,
        }
    }

    #[must_use]
    pub fn at(at: Instant, safety_margin: Duration) -> Self {
        Self { at, safety_margin }
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// True once no more than the safety margin is left.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.remaining() <= self.safety_margin
    }
}

pub struct WorkerPool {
    workers: usize,
    deadline: Deadline,
    max_items: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(workers: usize, deadline: Deadline) -> Self {
        Self {
            workers: workers.max(1),
            deadline,
            max_items: 0,
        }
    }

    /// Cap the queue; jobs past the cap are dropped before the run and not
    /// counted. Zero means unlimited.
    #[must_use]
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Run `handler` over `jobs`, recording each job's outcomes into
    /// `summary`. A job skipped for the deadline records a single
    /// [`SkipReason::Deadline`].
    pub async fn run<J, H, Fut>(&self, mut jobs: Vec<J>, summary: Arc<Summary>, handler: H)
    where
        J: Send + 'static,
        H: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Outcome>> + Send + 'static,
    {
        if self.max_items > 0 && jobs.len() > self.max_items {
            info!(queued = jobs.len(), cap = self.max_items, "Work queue capped");
            jobs.truncate(self.max_items);
        }
        let job_count = jobs.len();
        if job_count == 0 {
            return;
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let handler = Arc::new(handler);
        let workers = self.workers.min(job_count);
        crate::metrics::set_queue_depth(job_count);
        info!(jobs = job_count, workers, remaining_s = self.deadline.remaining().as_secs(), "Worker pool starting");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let summary = Arc::clone(&summary);
            let deadline = self.deadline;
            set.spawn(async move {
                loop {
                    let job = {
                        let mut queue = queue.lock();
                        let job = queue.pop_front();
                        crate::metrics::set_queue_depth(queue.len());
                        job
                    };
                    let Some(job) = job else { break };

                    if deadline.should_stop() {
                        summary.record(&Outcome::Skipped(SkipReason::Deadline));
                        continue;
                    }
                    for outcome in (*handler)(job).await {
                        summary.record(&outcome);
                    }
                }
                debug!(worker, "Worker drained queue");
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_deadline_margin() {
        let deadline = Deadline::after(Duration::from_secs(60), Duration::from_secs(30));
        assert!(!deadline.should_stop());
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!deadline.should_stop());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(deadline.should_stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_jobs_run_with_ample_budget() {
        let pool = WorkerPool::new(4, Deadline::after(Duration::from_secs(3600), DEFAULT_SAFETY_MARGIN));
        let summary = Arc::new(Summary::new("gaps"));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        pool.run((0..20).collect::<Vec<u32>>(), summary.clone(), move |_job| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                vec![Outcome::Uploaded]
            }
        })
        .await;

        assert_eq!(ran.load(Ordering::SeqCst), 20);
        let snap = summary.snapshot();
        assert_eq!(snap.uploaded, 20);
        assert_eq!(snap.skipped_deadline, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tight_budget_skips_for_deadline() {
        // 2 workers, 10s per job, 30s of usable budget: 6 jobs fit, 4 are skipped
        let pool = WorkerPool::new(2, Deadline::after(Duration::from_secs(60), Duration::from_secs(30)));
        let summary = Arc::new(Summary::new("gaps"));

        pool.run((0..10).collect::<Vec<u32>>(), summary.clone(), |_job| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            vec![Outcome::AbsentMarked]
        })
        .await;

        let snap = summary.snapshot();
        assert_eq!(snap.total, 10);
        assert!(snap.skipped_deadline >= 1);
        assert_eq!(snap.absent_marked + snap.skipped_deadline, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_items_caps_queue() {
        let pool = WorkerPool::new(2, Deadline::after(Duration::from_secs(3600), DEFAULT_SAFETY_MARGIN)).with_max_items(3);
        let summary = Arc::new(Summary::new("gaps"));
        pool.run((0..10).collect::<Vec<u32>>(), summary.clone(), |_job| async { vec![Outcome::Uploaded] })
            .await;
        assert_eq!(summary.snapshot().total, 3);
    }

    #[tokio::test]
    async fn test_multi_outcome_jobs() {
        let pool = WorkerPool::new(3, Deadline::after(Duration::from_secs(3600), DEFAULT_SAFETY_MARGIN));
        let summary = Arc::new(Summary::new("backfill"));
        pool.run(vec!["TJSP", "TJRO"], summary.clone(), |_entity| async {
            vec![Outcome::Uploaded, Outcome::AbsentMarked, Outcome::Skipped(SkipReason::AlreadyArchived)]
        })
        .await;
        let snap = summary.snapshot();
        assert_eq!(snap.total, 6);
        assert_eq!(snap.already_archived, 2);
    }
}
