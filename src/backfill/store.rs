// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor arena keyed by entity code, persisted as one JSON file.
//!
//! ```json
//! {"version": 1, "updated_at": "...", "entities": {"TJSP": { ...cursor... }}}
//! ```
//!
//! Each entity is scanned by exactly one task per run; the mutex only
//! makes each read-modify-write atomic against checkpoints. Entries that
//! fail to parse are carried through to the next save untouched.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::cursor::{Classification, CursorEffect, EntityCursor, ScanPlan, SkipCause};
use crate::error::BackupError;
use crate::state::write_atomic;

pub const CURSOR_FILE_VERSION: u32 = 1;

#[derive(Serialize)]
struct CursorFileRef {
    version: u32,
    updated_at: DateTime<Utc>,
    entities: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct CursorFile {
    #[serde(default)]
    entities: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct CursorStore {
    cursors: Mutex<BTreeMap<String, EntityCursor>>,
    unreadable: BTreeMap<String, serde_json::Value>,
}

impl CursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; missing or corrupt files give an empty store.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::new();
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No backfill cursor file, starting fresh");
                return Self::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Backfill cursor file unreadable, starting fresh");
                return Self::new();
            }
        };
        match Self::from_json(&raw) {
            Ok(store) => {
                info!(path = %path.display(), entities = store.len(), "Backfill cursors loaded");
                store
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Backfill cursor file corrupt, starting fresh");
                Self::new()
            }
        }
    }

    /// Parse the cursor file. A single bad entry is skipped with a warning.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: CursorFile = serde_json::from_str(raw)?;
        let mut cursors = BTreeMap::new();
        let mut unreadable = BTreeMap::new();
        for (entity, value) in file.entities {
            match serde_json::from_value::<EntityCursor>(value.clone()) {
                Ok(cursor) => {
                    cursors.insert(entity, cursor);
                }
                Err(e) => {
                    warn!(entity = %entity, error = %e, "Unreadable cursor entry, kept as is and not scanned");
                    unreadable.insert(entity, value);
                }
            }
        }
        Ok(Self {
            cursors: Mutex::new(cursors),
            unreadable,
        })
    }

    /// Entities whose stored entry could not be parsed.
    pub fn unreadable(&self) -> impl Iterator<Item = &str> {
        self.unreadable.keys().map(String::as_str)
    }

    /// Current cursor (default for an entity never seen).
    #[must_use]
    pub fn get(&self, entity: &str) -> EntityCursor {
        self.cursors.lock().get(entity).cloned().unwrap_or_default()
    }

    /// Compute the scan plan and, when the scan is not contiguous with the
    /// stored lower edge, restart the streak.
    pub fn begin_scan(&self, entity: &str, start: NaiveDate, lower_bound: NaiveDate) -> ScanPlan {
        if self.unreadable.contains_key(entity) {
            return ScanPlan::Skip(SkipCause::Unreadable);
        }
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(entity.to_string()).or_default();
        let plan = cursor.scan_plan(start, lower_bound);
        if let ScanPlan::Scan { reset_streak: true, .. } = plan {
            cursor.consecutive_empty_count = 0;
            cursor.upper_scanned_date = None;
        }
        plan
    }

    /// Mark `entity` as examined from its window up to `date`.
    pub fn extend_upper(&self, entity: &str, date: NaiveDate) {
        if let Some(cursor) = self.cursors.lock().get_mut(entity) {
            cursor.extend_upper(date);
        }
    }

    /// Fold one classified date into `entity`'s cursor.
    pub fn apply(
        &self,
        entity: &str,
        date: NaiveDate,
        class: Classification,
        threshold: u32,
    ) -> (EntityCursor, CursorEffect) {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(entity.to_string()).or_default();
        let (next, effect) = cursor.apply(date, class, threshold, Utc::now());
        *cursor = next.clone();
        (next, effect)
    }

    /// Manual reset. Returns `false` if the entity has no cursor.
    pub fn reset(&self, entity: &str) -> bool {
        match self.cursors.lock().get_mut(entity) {
            Some(cursor) => {
                cursor.reset();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cursors.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stopped_count(&self) -> usize {
        self.cursors.lock().values().filter(|c| c.stopped).count()
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, EntityCursor> {
        self.cursors.lock().clone()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut entities = self.unreadable.clone();
        for (entity, cursor) in self.cursors.lock().iter() {
            entities.insert(entity.clone(), serde_json::to_value(cursor)?);
        }
        serde_json::to_string_pretty(&CursorFileRef {
            version: CURSOR_FILE_VERSION,
            updated_at: Utc::now(),
            entities,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), BackupError> {
        let json = self.to_json().map_err(|source| BackupError::StateEncode {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, json.as_bytes())
    }
}
