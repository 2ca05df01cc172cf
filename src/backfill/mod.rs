// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backward per-entity scanning with a 60-empty stop rule.
//!
//! - [`cursor`]: the pure per-entity state machine (classification, ratchet)
//! - [`store`]: the persisted cursor arena
//! - [`engine`]: the scan loop driving cursors through the worker pool

pub mod cursor;
pub mod engine;
pub mod store;

pub use cursor::{Classification, CursorEffect, EntityCursor, ScanPlan, SkipCause, DEFAULT_STOP_THRESHOLD};
pub use engine::{BackfillConfig, BackfillEngine, BackfillReport, BackfillReportSnapshot};
pub use store::CursorStore;
