//! # djen-backup
//!
//! Backs up daily per-court DJEN documents into the Internet Archive and
//! backfills history, surviving a flaky upstream proxy and an archive that
//! sheds load.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GapDetector                           │
//! │  • StateCache short-circuit per date                        │
//! │  • Archive listing → covered set, gaps = expected − covered │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  WorkItems (newest first)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  WorkerPool + Deadline                      │
//! │  • N workers, shared queue, deadline − safety margin guard  │
//! │  • Every item accounted exactly once in the Summary         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ItemProcessor                           │
//! │  • CircuitBreaker permit (single HalfOpen probe)            │
//! │  • Upstream lookup + fetch, retried                         │
//! │  • Document or absence marker upload, retried               │
//! └─────────────────────────────────────────────────────────────┘
//!
//! Backfill: BackfillEngine queues one job per entity; each job walks
//! dates backward through the same processor and stops an entity after
//! 60 consecutive empty dates (the ratchet).
//! ```
//!
//! ## Modules
//!
//! - [`gap`]: gap discovery against the archive listing
//! - [`backfill`]: cursors, the cursor store and the scan loop
//! - [`scheduler`]: worker pool, deadline and run summary
//! - [`processor`]: one item from download to upload
//! - [`resilience`]: retry executor and circuit breaker
//! - [`upstream`], [`archive`]: collaborator traits and reqwest clients
//! - [`state`]: persisted `(date, entity)` status cache
//! - [`runner`]: ties everything together for the binary
//!
//! ## Configuration
//!
//! See [`BackupConfig`] for all configuration options.

pub mod archive;
pub mod backfill;
pub mod config;
pub mod credentials;
pub mod entities;
pub mod error;
pub mod gap;
pub mod metrics;
pub mod processor;
pub mod resilience;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod upstream;

pub use archive::{Archive, ArchiveConfig, InternetArchive, Listing, Upload, UploadKind};
pub use backfill::{BackfillConfig, BackfillEngine, Classification, CursorStore, EntityCursor};
pub use config::BackupConfig;
pub use error::{ArchiveError, BackupError, UpstreamError};
pub use gap::GapDetector;
pub use processor::ItemProcessor;
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitPhase};
pub use resilience::retry::{RetryConfig, RetryError};
pub use runner::{RunReport, Runner};
pub use scheduler::{Deadline, Summary, SummarySnapshot, WorkerPool};
pub use state::StateCache;
pub use types::{FailureReason, ItemStatus, Outcome, SkipReason, WorkItem};
pub use upstream::{Absence, Download, Lookup, ProxyClient, ProxyConfig, Upstream};
pub use metrics::LatencyTimer;
