// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for djen-backup.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The binary (or an embedding scheduler) chooses the exporter; with no
//! recorder installed every call here is a no-op.
//!
//! # Metric Naming Convention
//! - `djen_backup_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `mode`: gaps, backfill
//! - `operation`: lookup, fetch, list, upload, entity_list
//! - `outcome`: see [`crate::Outcome::label`]

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::resilience::circuit_breaker::CircuitPhase;
use crate::Outcome;

/// Record the final outcome of one work item
pub fn record_outcome(mode: &str, outcome: &Outcome) {
    counter!(
        "djen_backup_items_total",
        "mode" => mode.to_string(),
        "outcome" => outcome.label()
    )
    .increment(1);
}

/// Record one retry (not the first attempt)
pub fn record_retry(operation: &str, cause: &str) {
    counter!(
        "djen_backup_retries_total",
        "operation" => operation.to_string(),
        "cause" => cause.to_string()
    )
    .increment(1);
}

/// Record request latency for a collaborator call
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "djen_backup_request_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a breaker phase change and publish the new phase as a gauge
pub fn record_circuit_transition(circuit: &str, from: CircuitPhase, to: CircuitPhase) {
    counter!(
        "djen_backup_circuit_transitions_total",
        "circuit" => circuit.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
    gauge!("djen_backup_circuit_state", "circuit" => circuit.to_string()).set(to as u8 as f64);
}

pub fn record_circuit_rejection(circuit: &str) {
    counter!(
        "djen_backup_circuit_rejections_total",
        "circuit" => circuit.to_string()
    )
    .increment(1);
}

/// Record where gap detection got its answer for a date
/// (`cache`, `archive`, `missing`, `error`)
pub fn record_listing(source: &str) {
    counter!(
        "djen_backup_listing_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a backfill classification (`hit`, `empty`, `error`)
pub fn record_classification(class: &str) {
    counter!(
        "djen_backup_backfill_classifications_total",
        "class" => class.to_string()
    )
    .increment(1);
}

/// Set the number of jobs still waiting in the worker pool queue
pub fn set_queue_depth(depth: usize) {
    gauge!("djen_backup_queue_depth").set(depth as f64);
}

/// Set the number of entities currently in the stopped state
pub fn set_stopped_entities(count: usize) {
    gauge!("djen_backup_stopped_entities").set(count as f64);
}

/// Record total wall-clock time of a run
pub fn record_run_duration(mode: &str, duration: Duration) {
    histogram!(
        "djen_backup_run_seconds",
        "mode" => mode.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
