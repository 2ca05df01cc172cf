// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent `(date, entity) → status` cache.
//!
//! Saves archive metadata queries across runs. The archive listing is the
//! authority; this is an optimisation only, and a lost or corrupt file just
//! means the next run asks the archive again.
//!
//! All access goes through one coarse mutex. Compound operations
//! ([`StateCache::mark_if_unknown`], [`StateCache::merge_listing`],
//! [`StateCache::covers`]) run inside a single critical section, and the
//! lock is never held across an `.await`.
//!
//! # File format
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2024-03-02T04:05:06Z",
//!   "entries": {
//!     "2024-03-01": { "TJSP": { "status": "uploaded", "timestamp": "..." } }
//!   }
//! }
//! ```

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::BackupError;
use crate::ItemStatus;

pub const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub status: ItemStatus,
    pub timestamp: DateTime<Utc>,
}

type Entries = BTreeMap<NaiveDate, BTreeMap<String, StateEntry>>;

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    entries: &'a Entries,
}

#[derive(Deserialize)]
struct StateFile {
    #[serde(default)]
    entries: Entries,
}

#[derive(Debug, Default)]
pub struct StateCache {
    entries: Mutex<Entries>,
}

impl StateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing path or file yields an empty cache; a
    /// corrupt file is logged and also yields an empty cache.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::new();
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state cache file, starting empty");
                return Self::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "State cache unreadable, starting empty");
                return Self::new();
            }
        };
        match Self::from_json(&raw) {
            Ok(cache) => {
                info!(path = %path.display(), dates = cache.date_count(), "State cache loaded");
                cache
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "State cache corrupt, starting empty");
                Self::new()
            }
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: StateFile = serde_json::from_str(raw)?;
        Ok(Self {
            entries: Mutex::new(file.entries),
        })
    }

    #[must_use]
    pub fn get(&self, date: NaiveDate, entity: &str) -> Option<ItemStatus> {
        self.entries
            .lock()
            .get(&date)
            .and_then(|day| day.get(entity))
            .map(|e| e.status)
    }

    pub fn mark(&self, date: NaiveDate, entity: &str, status: ItemStatus) {
        let entry = StateEntry {
            status,
            timestamp: Utc::now(),
        };
        self.entries
            .lock()
            .entry(date)
            .or_default()
            .insert(entity.to_string(), entry);
    }

    /// Record `status` only if nothing is known yet. Returns whether it wrote.
    pub fn mark_if_unknown(&self, date: NaiveDate, entity: &str, status: ItemStatus) -> bool {
        let mut entries = self.entries.lock();
        let day = entries.entry(date).or_default();
        if day.contains_key(entity) {
            return false;
        }
        day.insert(
            entity.to_string(),
            StateEntry {
                status,
                timestamp: Utc::now(),
            },
        );
        true
    }

    /// Fold an archive listing into the cache. Listed statuses overwrite
    /// whatever the cache held for those entities.
    pub fn merge_listing(&self, date: NaiveDate, listed: &BTreeMap<String, ItemStatus>) {
        if listed.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let day = entries.entry(date).or_default();
        for (entity, status) in listed {
            let stale = day.get(entity).map_or(true, |e| e.status != *status);
            if stale {
                day.insert(entity.clone(), StateEntry { status: *status, timestamp: now });
            }
        }
    }

    #[must_use]
    pub fn known_entities(&self, date: NaiveDate) -> BTreeSet<String> {
        self.entries
            .lock()
            .get(&date)
            .map(|day| day.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether every entity in `expected` has a known status for `date`.
    #[must_use]
    pub fn covers(&self, date: NaiveDate, expected: &BTreeSet<String>) -> bool {
        let entries = self.entries.lock();
        match entries.get(&date) {
            Some(day) => expected.iter().all(|e| day.contains_key(e)),
            None => expected.is_empty(),
        }
    }

    #[must_use]
    pub fn date_count(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop dates older than `today - ttl_days`. Returns how many dates went.
    /// A TTL of zero keeps everything.
    pub fn prune(&self, today: NaiveDate, ttl_days: u32) -> usize {
        if ttl_days == 0 {
            return 0;
        }
        let cutoff = today - ChronoDuration::days(i64::from(ttl_days));
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|date, _| *date >= cutoff);
        before - entries.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let entries = self.entries.lock();
        serde_json::to_string_pretty(&StateFileRef {
            version: STATE_FILE_VERSION,
            updated_at: Utc::now(),
            entries: &entries,
        })
    }

    /// Prune, then atomically write the cache to `path`.
    pub fn save(&self, path: &Path, today: NaiveDate, ttl_days: u32) -> Result<(), BackupError> {
        let pruned = self.prune(today, ttl_days);
        if pruned > 0 {
            info!(removed = pruned, "State cache pruned");
        }
        let json = self.to_json().map_err(|source| BackupError::StateEncode {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, json.as_bytes())?;
        info!(path = %path.display(), dates = self.date_count(), "State cache saved");
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackupError> {
    let io_err = |source| BackupError::StateIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file atomically");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn set(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mark_and_get() {
        let cache = StateCache::new();
        assert_eq!(cache.get(day("2024-01-15"), "TJSP"), None);

        cache.mark(day("2024-01-15"), "TJSP", ItemStatus::Uploaded);
        cache.mark(day("2024-01-15"), "TJRO", ItemStatus::Absent);

        assert_eq!(cache.get(day("2024-01-15"), "TJSP"), Some(ItemStatus::Uploaded));
        assert_eq!(cache.get(day("2024-01-15"), "TJRO"), Some(ItemStatus::Absent));
        assert_eq!(cache.get(day("2024-01-16"), "TJSP"), None);
        assert_eq!(cache.known_entities(day("2024-01-15")), set(&["TJRO", "TJSP"]));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_mark_if_unknown_keeps_existing() {
        let cache = StateCache::new();
        assert!(cache.mark_if_unknown(day("2024-01-15"), "TJSP", ItemStatus::Absent));
        assert!(!cache.mark_if_unknown(day("2024-01-15"), "TJSP", ItemStatus::Uploaded));
        assert_eq!(cache.get(day("2024-01-15"), "TJSP"), Some(ItemStatus::Absent));
    }

    #[test]
    fn test_merge_listing_archive_wins() {
        let cache = StateCache::new();
        cache.mark(day("2024-01-15"), "TJSP", ItemStatus::Absent);
        cache.mark(day("2024-01-15"), "TJRJ", ItemStatus::Uploaded);

        let mut listed = BTreeMap::new();
        listed.insert("TJSP".to_string(), ItemStatus::Uploaded);
        listed.insert("TJMG".to_string(), ItemStatus::Absent);
        cache.merge_listing(day("2024-01-15"), &listed);

        assert_eq!(cache.get(day("2024-01-15"), "TJSP"), Some(ItemStatus::Uploaded));
        assert_eq!(cache.get(day("2024-01-15"), "TJMG"), Some(ItemStatus::Absent));
        // Not in the listing: cache entry untouched
        assert_eq!(cache.get(day("2024-01-15"), "TJRJ"), Some(ItemStatus::Uploaded));
    }

    #[test]
    fn test_covers() {
        let cache = StateCache::new();
        assert!(!cache.covers(day("2024-01-15"), &set(&["TJSP"])));
        assert!(cache.covers(day("2024-01-15"), &set(&[])));

        cache.mark(day("2024-01-15"), "TJSP", ItemStatus::Uploaded);
        assert!(cache.covers(day("2024-01-15"), &set(&["TJSP"])));
        assert!(!cache.covers(day("2024-01-15"), &set(&["TJSP", "TJRJ"])));
    }

    #[test]
    fn test_prune_by_ttl() {
        let cache = StateCache::new();
        cache.mark(day("2024-01-01"), "TJSP", ItemStatus::Uploaded);
        cache.mark(day("2024-03-30"), "TJSP", ItemStatus::Uploaded);
        cache.mark(day("2024-03-31"), "TJSP", ItemStatus::Uploaded);
        cache.mark(day("2024-04-01"), "TJSP", ItemStatus::Uploaded);

        assert_eq!(cache.prune(day("2024-04-10"), 0), 0);
        // Cutoff 2024-03-31 is kept, anything older goes
        assert_eq!(cache.prune(day("2024-04-10"), 10), 2);
        assert_eq!(cache.date_count(), 2);
        assert_eq!(cache.get(day("2024-01-01"), "TJSP"), None);
        assert_eq!(cache.get(day("2024-03-30"), "TJSP"), None);
        assert_eq!(cache.get(day("2024-03-31"), "TJSP"), Some(ItemStatus::Uploaded));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let cache = StateCache::new();
        cache.mark(day("2024-01-15"), "TJSP", ItemStatus::Uploaded);
        cache.mark(day("2024-01-15"), "TJRO", ItemStatus::Absent);
        cache.save(&path, day("2024-01-20"), 90).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["entries"]["2024-01-15"]["TJSP"]["status"], "uploaded");
        assert!(value["updated_at"].is_string());

        let reloaded = StateCache::load(Some(&path));
        assert_eq!(reloaded.get(day("2024-01-15"), "TJRO"), Some(ItemStatus::Absent));
        assert_eq!(reloaded.len(), 2);

        // No temp file left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(StateCache::load(Some(&missing)).is_empty());
        assert!(StateCache::load(None).is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert!(StateCache::load(Some(&corrupt)).is_empty());

        let wrong_shape = dir.path().join("shape.json");
        std::fs::write(&wrong_shape, r#"{"entries": {"2024-01-15": {"TJSP": {"status": "gone"}}}}"#).unwrap();
        assert!(StateCache::load(Some(&wrong_shape)).is_empty());
    }
}
