// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker guarding archive uploads.
//!
//! Protects the archive from being hammered while it is unhealthy. After
//! `failure_threshold` consecutive upload failures the breaker opens and
//! callers are turned away until the recovery timeout elapses. Then exactly
//! one caller is let through as a probe:
//!
//! - Closed: normal operation, consecutive failures are counted
//! - Open: requests fail fast without touching the archive
//! - HalfOpen: one probe in flight; success closes, failure re-opens with
//!   the recovery timeout doubled (capped)
//!
//! The state machine is a pure function ([`step`]) so every transition can
//! be tested without clocks or locks. [`CircuitBreaker`] applies it under a
//! single mutex, which makes "read phase, then transition" atomic.
//!
//! Admission hands out a [`CircuitPermit`]. Dropping a permit without
//! recording a result (the item failed before reaching the archive)
//! releases a held probe slot so the next caller can probe instead.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Breaker phase for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// The breaker is open (or a probe is already in flight)
    #[error("circuit breaker {phase}, request rejected")]
    Rejected { phase: CircuitPhase },
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// Wait before the first probe after opening
    pub recovery_timeout: Duration,
    /// Ceiling for the doubled recovery timeout
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitConfig {
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
            max_recovery_timeout: Duration::from_millis(200),
        }
    }
}

/// Whether a permit is an ordinary call or the half-open probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitKind {
    Normal,
    Probe,
}

/// Full breaker state. `epoch` increments on every phase change so results
/// from permits granted in an earlier phase can be recognised as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitState {
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub recovery_timeout: Duration,
    pub probe_in_flight: bool,
    pub epoch: u64,
}

impl CircuitState {
    #[must_use]
    pub fn closed(config: &CircuitConfig) -> Self {
        Self {
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            opened_at: None,
            recovery_timeout: config.recovery_timeout,
            probe_in_flight: false,
            epoch: 0,
        }
    }

    fn enter(&self, phase: CircuitPhase) -> Self {
        Self {
            phase,
            epoch: self.epoch + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    Request,
    Success { kind: PermitKind, epoch: u64 },
    Failure { kind: PermitKind, epoch: u64 },
    /// Permit dropped without a result
    Abandon { kind: PermitKind, epoch: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEffect {
    Admitted { kind: PermitKind, epoch: u64 },
    Rejected,
    /// Result applied to the state
    Recorded,
    /// A held probe slot was freed
    ProbeReleased,
    /// Stale or irrelevant result, state unchanged
    Ignored,
}

/// Pure transition function.
#[must_use]
pub fn step(
    config: &CircuitConfig,
    state: &CircuitState,
    event: CircuitEvent,
    now: Instant,
) -> (CircuitState, CircuitEffect) {
    use CircuitEvent as Ev;
    use CircuitPhase as P;

    match event {
        Ev::Request => match state.phase {
            P::Closed => (
                state.clone(),
                CircuitEffect::Admitted { kind: PermitKind::Normal, epoch: state.epoch },
            ),
            P::Open => {
                let elapsed = state
                    .opened_at
                    .map_or(state.recovery_timeout, |at| now.saturating_duration_since(at));
                if elapsed < state.recovery_timeout {
                    return (state.clone(), CircuitEffect::Rejected);
                }
                let mut next = state.enter(P::HalfOpen);
                next.probe_in_flight = true;
                let epoch = next.epoch;
                (next, CircuitEffect::Admitted { kind: PermitKind::Probe, epoch })
            }
            P::HalfOpen if state.probe_in_flight => (state.clone(), CircuitEffect::Rejected),
            P::HalfOpen => {
                let mut next = state.clone();
                next.probe_in_flight = true;
                (next, CircuitEffect::Admitted { kind: PermitKind::Probe, epoch: state.epoch })
            }
        },

        Ev::Success { epoch, .. } | Ev::Failure { epoch, .. } | Ev::Abandon { epoch, .. }
            if epoch != state.epoch =>
        {
            (state.clone(), CircuitEffect::Ignored)
        }

        Ev::Success { kind, .. } => match (state.phase, kind) {
            (P::Closed, PermitKind::Normal) => {
                let mut next = state.clone();
                next.consecutive_failures = 0;
                (next, CircuitEffect::Recorded)
            }
            (P::HalfOpen, PermitKind::Probe) => {
                let mut next = state.enter(P::Closed);
                next.consecutive_failures = 0;
                next.opened_at = None;
                next.probe_in_flight = false;
                next.recovery_timeout = config.recovery_timeout;
                (next, CircuitEffect::Recorded)
            }
            _ => (state.clone(), CircuitEffect::Ignored),
        },

        Ev::Failure { kind, .. } => match (state.phase, kind) {
            (P::Closed, PermitKind::Normal) => {
                let failures = state.consecutive_failures.saturating_add(1);
                let mut next = if failures >= config.failure_threshold {
                    let mut opened = state.enter(P::Open);
                    opened.opened_at = Some(now);
                    opened
                } else {
                    state.clone()
                };
                next.consecutive_failures = failures;
                (next, CircuitEffect::Recorded)
            }
            (P::HalfOpen, PermitKind::Probe) => {
                let mut next = state.enter(P::Open);
                next.opened_at = Some(now);
                next.probe_in_flight = false;
                next.consecutive_failures = state.consecutive_failures.saturating_add(1);
                next.recovery_timeout = state
                    .recovery_timeout
                    .saturating_mul(2)
                    .min(config.max_recovery_timeout);
                (next, CircuitEffect::Recorded)
            }
            _ => (state.clone(), CircuitEffect::Ignored),
        },

        Ev::Abandon { kind: PermitKind::Probe, .. } if state.phase == P::HalfOpen => {
            let mut next = state.clone();
            next.probe_in_flight = false;
            (next, CircuitEffect::ProbeReleased)
        }
        Ev::Abandon { .. } => (state.clone(), CircuitEffect::Ignored),
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: Mutex<CircuitState>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let state = CircuitState::closed(&config);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(state),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn phase(&self) -> CircuitPhase {
        self.state.lock().phase
    }

    /// Snapshot of the full state (tests and diagnostics)
    #[must_use]
    pub fn snapshot(&self) -> CircuitState {
        self.state.lock().clone()
    }

    /// Ask for admission. The returned permit must be resolved with
    /// [`CircuitPermit::record_success`] or [`CircuitPermit::record_failure`]
    /// once the guarded upload finishes.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, CircuitError> {
        let (effect, phase) = self.apply(CircuitEvent::Request);
        match effect {
            CircuitEffect::Admitted { kind, epoch } => {
                self.calls_total.fetch_add(1, Ordering::Relaxed);
                if kind == PermitKind::Probe {
                    info!(circuit = %self.name, "Circuit half-open, admitting probe");
                }
                Ok(CircuitPermit {
                    breaker: self,
                    kind,
                    epoch,
                    resolved: false,
                })
            }
            _ => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, %phase, "Circuit breaker rejected call");
                crate::metrics::record_circuit_rejection(&self.name);
                Err(CircuitError::Rejected { phase })
            }
        }
    }

    /// Run one event through [`step`] under the lock; returns the effect and
    /// the phase after the transition.
    fn apply(&self, event: CircuitEvent) -> (CircuitEffect, CircuitPhase) {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let before = guard.phase;
        let (next, effect) = step(&self.config, &guard, event, now);
        *guard = next;
        let after = guard.phase;
        let failures = guard.consecutive_failures;
        let recovery = guard.recovery_timeout;
        drop(guard);

        if before != after {
            self.log_transition(before, after, failures, recovery);
        }
        (effect, after)
    }

    fn log_transition(&self, from: CircuitPhase, to: CircuitPhase, failures: u32, recovery: Duration) {
        crate::metrics::record_circuit_transition(&self.name, from, to);
        match (from, to) {
            (CircuitPhase::Closed, CircuitPhase::Open) => error!(
                circuit = %self.name,
                failures,
                recovery_s = recovery.as_secs_f64(),
                "Circuit breaker opened"
            ),
            (CircuitPhase::HalfOpen, CircuitPhase::Open) => warn!(
                circuit = %self.name,
                next_retry_s = recovery.as_secs_f64(),
                "Probe failed, circuit breaker re-opened"
            ),
            (_, CircuitPhase::Closed) => info!(circuit = %self.name, "Circuit breaker closed"),
            _ => debug!(circuit = %self.name, %from, %to, "Circuit breaker transition"),
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Calls turned away while open or while a probe was in flight
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Admission token from [`CircuitBreaker::try_acquire`].
#[must_use = "dropping a permit without a result records nothing"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    epoch: u64,
    resolved: bool,
}

impl CircuitPermit<'_> {
    #[must_use]
    pub fn kind(&self) -> PermitKind {
        self.kind
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.successes.fetch_add(1, Ordering::Relaxed);
        self.breaker.apply(CircuitEvent::Success { kind: self.kind, epoch: self.epoch });
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.failures.fetch_add(1, Ordering::Relaxed);
        self.breaker.apply(CircuitEvent::Failure { kind: self.kind, epoch: self.epoch });
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            let (effect, _) = self.breaker.apply(CircuitEvent::Abandon { kind: self.kind, epoch: self.epoch });
            if effect == CircuitEffect::ProbeReleased {
                debug!(circuit = %self.breaker.name, "Probe abandoned, slot released");
            }
        }
    }
}
