// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Upstream document source.
//!
//! The core only needs three answers from upstream: here is the document,
//! there authoritatively is no document (with the status and reason to put
//! in the absence marker), or something went wrong. [`http::ProxyClient`] is
//! the production implementation; tests use in-memory fakes.

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;

use crate::error::UpstreamError;

pub use http::{ProxyClient, ProxyConfig};

/// Where to fetch a document from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub url: String,
}

/// Authoritative "nothing published" answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Absence {
    pub status_code: u16,
    pub reason: String,
}

impl Absence {
    pub fn new(status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            status_code,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(DocumentRef),
    Absent(Absence),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Document(Bytes),
    Absent(Absence),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn lookup(&self, entity: &str, date: NaiveDate) -> Result<Lookup, UpstreamError>;

    async fn fetch(&self, doc: &DocumentRef) -> Result<Download, UpstreamError>;

    /// Lookup then fetch. An absent lookup short-circuits.
    async fn download(&self, entity: &str, date: NaiveDate) -> Result<Download, UpstreamError> {
        match self.lookup(entity, date).await? {
            Lookup::Found(doc) => self.fetch(&doc).await,
            Lookup::Absent(absence) => Ok(Download::Absent(absence)),
        }
    }

    /// Entity codes the upstream currently advertises. Empty when the
    /// source has no listing endpoint.
    async fn entity_codes(&self) -> Result<Vec<String>, UpstreamError> {
        Ok(Vec::new())
    }
}
