// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backfill runs end to end: cursor file in, cursor file out.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use djen_backup::backfill::CursorStore;
use djen_backup::runner::reset_entity;
use djen_backup::{BackupConfig, EntityCursor};
use tempfile::TempDir;

fn cursor_file(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("backfill.json");
    std::fs::write(&path, body).unwrap();
    path
}

fn backfill_config(path: &Path, threshold: u32) -> BackupConfig {
    BackupConfig {
        backfill_state_file: Some(path.to_path_buf()),
        stop_threshold: threshold,
        lower_bound: day("2020-01-01"),
        ..test_config()
    }
}

fn stored(path: &Path, entity: &str) -> EntityCursor {
    CursorStore::load(Some(path)).get(entity)
}

const STOPPED_AT_MARCH_1: &str = r#"{
    "version": 1,
    "entities": {
        "TJSP": {
            "lower_scanned_date": "2024-03-01",
            "consecutive_empty_count": 60,
            "stopped": true,
            "stop_boundary_date": "2024-03-01"
        }
    }
}"#;

#[tokio::test]
async fn sixtieth_empty_stops_entity() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(
        &dir,
        r#"{"version": 1, "entities": {"TJSP": {"lower_scanned_date": "2024-03-01", "consecutive_empty_count": 59}}}"#,
    );
    let upstream = Arc::new(FakeUpstream::new());
    let archive = Arc::new(FakeArchive::new());

    let report = runner(backfill_config(&path, 60), &upstream, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP"]))
        .await
        .unwrap();

    // 03-10 down to 03-02 leave the streak alone; 02-29 is the sixtieth empty
    assert_eq!(report.summary.absent_marked, 10);
    assert!(!archive.uploaded_names().contains(&archived_name(day("2024-03-01"), "TJSP", "absent")));
    assert_eq!(report.backfill.unwrap().newly_stopped, 1);
    let cursor = stored(&path, "TJSP");
    assert!(cursor.stopped);
    assert_eq!(cursor.consecutive_empty_count, 60);
    assert_eq!(cursor.stop_boundary_date, Some(day("2024-02-29")));
    assert_eq!(cursor.lower_scanned_date, Some(day("2024-02-29")));
    assert_eq!(cursor.upper_scanned_date, Some(day("2024-03-10")));
}

#[tokio::test]
async fn document_newer_than_lower_edge_is_backfilled() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(
        &dir,
        r#"{"version": 1, "entities": {"TJSP": {"lower_scanned_date": "2024-03-01", "consecutive_empty_count": 3}}}"#,
    );
    let upstream = Arc::new(FakeUpstream::new().with_document(day("2024-03-20"), "TJSP"));
    let archive = Arc::new(FakeArchive::new());
    let config = BackupConfig {
        max_dates_per_entity: 5,
        ..backfill_config(&path, 60)
    };

    let report = runner(config, &upstream, &archive)
        .run_backfill(day("2024-03-24"), codes(&["TJSP"]))
        .await
        .unwrap();

    assert_eq!(report.summary.uploaded, 1);
    assert!(archive.uploaded_names().contains(&archived_name(day("2024-03-20"), "TJSP", "zip")));
    let cursor = stored(&path, "TJSP");
    assert_eq!(cursor.last_hit_date, Some(day("2024-03-20")));
    // The cap ended the run above the old lower edge, nothing below it moved
    assert_eq!(cursor.lower_scanned_date, Some(day("2024-03-01")));
    assert_eq!(cursor.consecutive_empty_count, 3);
    assert_eq!(cursor.upper_scanned_date, None);

    // Uncapped: the rest of the newer range, then contiguous from 02-29
    let report = runner(backfill_config(&path, 5), &upstream, &archive)
        .run_backfill(day("2024-03-24"), codes(&["TJSP"]))
        .await
        .unwrap();

    assert_eq!(report.summary.already_archived, 5);
    assert_eq!(report.summary.absent_marked, 18 + 2);
    let cursor = stored(&path, "TJSP");
    assert!(cursor.stopped);
    assert_eq!(cursor.stop_boundary_date, Some(day("2024-02-28")));
    assert_eq!(cursor.upper_scanned_date, Some(day("2024-03-24")));
}

#[tokio::test]
async fn stopped_entity_without_new_hits_stays_at_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(&dir, STOPPED_AT_MARCH_1);
    let upstream = Arc::new(FakeUpstream::new());
    let archive = Arc::new(FakeArchive::new());

    let report = runner(backfill_config(&path, 60), &upstream, &archive)
        .run_backfill(day("2024-03-05"), codes(&["TJSP"]))
        .await
        .unwrap();

    // 03-05 down to 03-02 are re-examined, nothing at or below the boundary
    assert_eq!(report.summary.absent_marked, 4);
    assert!(!archive.uploaded_names().contains(&archived_name(day("2024-03-01"), "TJSP", "absent")));
    let cursor = stored(&path, "TJSP");
    assert!(cursor.stopped);
    assert_eq!(cursor.stop_boundary_date, Some(day("2024-03-01")));
    assert_eq!(cursor.consecutive_empty_count, 60);
}

#[tokio::test]
async fn stopped_entity_skipped_when_nothing_newer() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(&dir, STOPPED_AT_MARCH_1);
    let upstream = Arc::new(FakeUpstream::new());
    let archive = Arc::new(FakeArchive::new());

    let report = runner(backfill_config(&path, 60), &upstream, &archive)
        .run_backfill(day("2024-03-01"), codes(&["TJSP"]))
        .await
        .unwrap();

    assert_eq!(report.summary.skipped_stopped_entity, 1);
    assert_eq!(report.summary.total, 1);
    assert_eq!(upstream.lookup_count(), 0);
}

#[tokio::test]
async fn hit_above_boundary_reopens_older_dates() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(&dir, STOPPED_AT_MARCH_1);
    let upstream = Arc::new(FakeUpstream::new().with_document(day("2024-03-03"), "TJSP"));
    let archive = Arc::new(FakeArchive::new());

    let report = runner(backfill_config(&path, 3), &upstream, &archive)
        .run_backfill(day("2024-03-05"), codes(&["TJSP"]))
        .await
        .unwrap();

    let backfill = report.backfill.unwrap();
    assert_eq!(backfill.stops_invalidated, 1);
    assert_eq!(backfill.newly_stopped, 1);
    assert_eq!(report.summary.uploaded, 1);
    // Scanned past the old boundary before stopping again
    assert!(archive.uploaded_names().contains(&archived_name(day("2024-02-29"), "TJSP", "absent")));
    let cursor = stored(&path, "TJSP");
    assert!(cursor.stopped);
    assert_eq!(cursor.stop_boundary_date, Some(day("2024-02-29")));
    assert_eq!(cursor.last_hit_date, Some(day("2024-03-03")));
}

#[tokio::test]
async fn hit_resets_long_streak() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(
        &dir,
        r#"{"version": 1, "entities": {"TJSP": {"lower_scanned_date": "2024-03-01", "consecutive_empty_count": 59}}}"#,
    );
    let upstream = Arc::new(FakeUpstream::new().with_document(day("2024-02-29"), "TJSP"));
    let archive = Arc::new(FakeArchive::new());
    let config = BackupConfig {
        max_dates_per_entity: 1,
        ..backfill_config(&path, 60)
    };

    runner(config, &upstream, &archive)
        .run_backfill(day("2024-03-01"), codes(&["TJSP"]))
        .await
        .unwrap();

    let cursor = stored(&path, "TJSP");
    assert_eq!(cursor.consecutive_empty_count, 0);
    assert!(!cursor.stopped);
    assert_eq!(cursor.last_hit_date, Some(day("2024-02-29")));
}

#[tokio::test]
async fn error_halts_entity_and_next_run_retries_that_date() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfill.json");
    let upstream = Arc::new(FakeUpstream::new().with_malformed(day("2024-03-08"), "TJSP"));
    let archive = Arc::new(FakeArchive::new());

    let report = runner(backfill_config(&path, 60), &upstream, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP"]))
        .await
        .unwrap();

    assert_eq!(report.summary.absent_marked, 2);
    assert_eq!(report.summary.failed, 1);
    let cursor = stored(&path, "TJSP");
    assert_eq!(cursor.lower_scanned_date, Some(day("2024-03-09")));
    assert_eq!(cursor.consecutive_empty_count, 2);
    assert!(!cursor.stopped);

    // Healthy upstream: resumes at the errored date
    let healthy = Arc::new(FakeUpstream::new());
    let config = BackupConfig {
        max_dates_per_entity: 1,
        ..backfill_config(&path, 60)
    };
    runner(config, &healthy, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP"]))
        .await
        .unwrap();
    assert!(archive.uploaded_names().contains(&archived_name(day("2024-03-08"), "TJSP", "absent")));
    assert_eq!(stored(&path, "TJSP").consecutive_empty_count, 3);
}

#[tokio::test]
async fn archived_dates_classified_without_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfill.json");
    let d = day("2024-03-10");
    let listed = [archived_name(d, "TJSP", "zip"), archived_name(d, "TJRO", "absent")];
    let upstream = Arc::new(FakeUpstream::new());
    let archive = Arc::new(FakeArchive::new().with_files(d, &[listed[0].as_str(), listed[1].as_str()]));
    let config = BackupConfig {
        lower_bound: d,
        ..backfill_config(&path, 60)
    };

    let report = runner(config, &upstream, &archive)
        .run_backfill(d, codes(&["TJSP", "TJRO"]))
        .await
        .unwrap();

    assert_eq!(report.summary.already_archived, 2);
    assert_eq!(upstream.lookup_count(), 0);
    assert_eq!(stored(&path, "TJSP").last_hit_date, Some(d));
    assert_eq!(stored(&path, "TJRO").consecutive_empty_count, 1);
}

#[tokio::test]
async fn lower_bound_ends_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfill.json");
    let upstream = Arc::new(FakeUpstream::new());
    let archive = Arc::new(FakeArchive::new());
    let config = BackupConfig {
        lower_bound: day("2024-03-08"),
        ..backfill_config(&path, 60)
    };

    let first = runner(config.clone(), &upstream, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP"]))
        .await
        .unwrap();
    assert_eq!(first.summary.absent_marked, 3);

    let second = runner(config, &upstream, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP"]))
        .await
        .unwrap();
    assert_eq!(second.summary.total, 0);
    assert_eq!(stored(&path, "TJSP").lower_scanned_date, Some(day("2024-03-08")));
}

#[tokio::test]
async fn many_entities_scan_independently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfill.json");
    let upstream = Arc::new(FakeUpstream::new().with_document(day("2024-03-09"), "TJRO"));
    let archive = Arc::new(FakeArchive::new());

    let report = runner(backfill_config(&path, 2), &upstream, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP", "TJRO", "TRF1"]))
        .await
        .unwrap();

    // TJSP and TRF1: 2 empties each; TJRO: empty, hit, empty, empty
    assert_eq!(report.summary.uploaded, 1);
    assert_eq!(report.summary.absent_marked, 7);
    assert_eq!(report.backfill.unwrap().newly_stopped, 3);
    assert_eq!(CursorStore::load(Some(&path)).stopped_count(), 3);
    assert_eq!(stored(&path, "TJRO").stop_boundary_date, Some(day("2024-03-07")));
}

#[tokio::test]
async fn reset_clears_stop() {
    let dir = tempfile::tempdir().unwrap();
    let path = cursor_file(&dir, STOPPED_AT_MARCH_1);

    assert!(reset_entity(&path, "TJSP").unwrap());
    assert!(!reset_entity(&path, "TRF1").unwrap());

    let cursor = stored(&path, "TJSP");
    assert!(!cursor.stopped);
    assert_eq!(cursor.consecutive_empty_count, 0);
    assert_eq!(cursor.lower_scanned_date, Some(day("2024-03-01")));

    // Scanning resumes below the old lower edge
    let upstream = Arc::new(FakeUpstream::new());
    let archive = Arc::new(FakeArchive::new());
    let config = BackupConfig {
        max_dates_per_entity: 1,
        ..backfill_config(&path, 60)
    };
    runner(config, &upstream, &archive)
        .run_backfill(day("2024-03-01"), codes(&["TJSP"]))
        .await
        .unwrap();
    assert_eq!(archive.uploaded_names(), vec![archived_name(day("2024-02-29"), "TJSP", "absent")]);
}

#[tokio::test(start_paused = true)]
async fn deadline_cuts_long_scans() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfill.json");
    let upstream = Arc::new(FakeUpstream::new().with_delay(Duration::from_secs(10)));
    let archive = Arc::new(FakeArchive::new());
    let config = BackupConfig {
        deadline_minutes: 1,
        safety_margin_secs: 30,
        ..backfill_config(&path, 60)
    };

    let report = runner(config, &upstream, &archive)
        .run_backfill(day("2024-03-10"), codes(&["TJSP"]))
        .await
        .unwrap();

    assert_eq!(report.summary.skipped_deadline, 1);
    assert_eq!(report.summary.absent_marked, 3);
    assert_eq!(report.summary.bucket_sum(), report.summary.total);
}
