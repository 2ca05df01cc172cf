// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable archive: per-date listing and per-item upload.
//!
//! Each date is one archive item named `{prefix}-{date}`. Inside it every
//! entity has either a document `{prefix}-{date}-{entity}.zip` or an
//! absence marker `{prefix}-{date}-{entity}.absent`. Uploads overwrite, so
//! repeating one is always safe.

pub mod http;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use md5::{Digest, Md5};
use serde::Serialize;

use crate::error::ArchiveError;
use crate::upstream::Absence;
use crate::ItemStatus;

pub use http::{ArchiveConfig, InternetArchive};

const DOCUMENT_EXT: &str = ".zip";
const ABSENT_EXT: &str = ".absent";

/// What the archive holds for one date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// The date's container does not exist yet
    Missing,
    Files(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Document,
    AbsenceMarker,
}

impl UploadKind {
    #[must_use]
    pub fn status(self) -> ItemStatus {
        match self {
            Self::Document => ItemStatus::Uploaded,
            Self::AbsenceMarker => ItemStatus::Absent,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Document => DOCUMENT_EXT,
            Self::AbsenceMarker => ABSENT_EXT,
        }
    }
}

/// Body of a `.absent` file
#[derive(Debug, Clone, Serialize)]
pub struct AbsenceMarker<'a> {
    pub status_code: u16,
    pub reason: &'a str,
    pub checked_at: DateTime<Utc>,
}

/// One object to PUT into the archive
#[derive(Debug, Clone)]
pub struct Upload {
    pub date: NaiveDate,
    pub entity: String,
    pub kind: UploadKind,
    pub payload: Bytes,
}

impl Upload {
    pub fn document(date: NaiveDate, entity: &str, payload: Bytes) -> Self {
        Self {
            date,
            entity: entity.to_string(),
            kind: UploadKind::Document,
            payload,
        }
    }

    pub fn absence_marker(
        date: NaiveDate,
        entity: &str,
        absence: &Absence,
        checked_at: DateTime<Utc>,
    ) -> Result<Self, ArchiveError> {
        let marker = AbsenceMarker {
            status_code: absence.status_code,
            reason: &absence.reason,
            checked_at,
        };
        let payload = serde_json::to_vec(&marker).map_err(|e| ArchiveError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            date,
            entity: entity.to_string(),
            kind: UploadKind::AbsenceMarker,
            payload: Bytes::from(payload),
        })
    }

    #[must_use]
    pub fn filename(&self, prefix: &str) -> String {
        format!("{}-{}-{}{}", prefix, iso(self.date), self.entity, self.kind.extension())
    }

    /// Base64 of the raw MD5 digest, as the `Content-MD5` header expects
    #[must_use]
    pub fn content_md5(&self) -> String {
        content_md5(&self.payload)
    }
}

#[must_use]
pub fn content_md5(payload: &[u8]) -> String {
    let digest = Md5::digest(payload);
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Archive item holding every entity's file for `date`
#[must_use]
pub fn item_identifier(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}", prefix, iso(date))
}

/// Parse `{prefix}-{date}-{entity}.zip|.absent`. Anything else is `None`.
#[must_use]
pub fn parse_filename(prefix: &str, date: NaiveDate, name: &str) -> Option<(String, ItemStatus)> {
    let stem = format!("{}-", item_identifier(prefix, date));
    let rest = name.strip_prefix(&stem)?;
    let (entity, status) = if let Some(entity) = rest.strip_suffix(DOCUMENT_EXT) {
        (entity, ItemStatus::Uploaded)
    } else if let Some(entity) = rest.strip_suffix(ABSENT_EXT) {
        (entity, ItemStatus::Absent)
    } else {
        return None;
    };
    if entity.is_empty() || entity.contains('/') {
        return None;
    }
    Some((entity.to_string(), status))
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
pub trait Archive: Send + Sync {
    /// Filenames stored under `date`'s item, or [`Listing::Missing`].
    async fn list(&self, date: NaiveDate) -> Result<Listing, ArchiveError>;

    /// Store one object. Overwrites any previous object with the same name.
    async fn upload(&self, upload: &Upload) -> Result<(), ArchiveError>;
}
