// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy.
//!
//! Per-item errors ([`UpstreamError`], [`ArchiveError`]) never abort a run;
//! the scheduler turns them into [`crate::Outcome::Failed`]. Only
//! [`BackupError`] (configuration, credentials, state files) is fatal.

use std::path::PathBuf;
use thiserror::Error;

use crate::resilience::retry::RetryError;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("rate limited, gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("upstream returned status {status}")]
    Status { status: u16 },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("rate limited, gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("archive returned status {status}")]
    Status { status: u16 },
    #[error("malformed archive response: {0}")]
    Malformed(String),
    #[error("invalid upload request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("archive credentials not found: {0}")]
    Credentials(String),
    #[error("state file {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} could not be encoded: {source}")]
    StateEncode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<RetryError<reqwest::Error>> for UpstreamError {
    fn from(err: RetryError<reqwest::Error>) -> Self {
        match err {
            RetryError::Exhausted { status: 429, attempts } => Self::RateLimited { attempts },
            RetryError::Exhausted { status, .. } => Self::Status { status },
            RetryError::TransportExhausted { last, .. } => Self::Transient(last.to_string()),
            RetryError::Fatal(e) => Self::Transient(e.to_string()),
        }
    }
}

impl From<RetryError<reqwest::Error>> for ArchiveError {
    fn from(err: RetryError<reqwest::Error>) -> Self {
        match err {
            RetryError::Exhausted { status: 429, attempts } => Self::RateLimited { attempts },
            RetryError::Exhausted { status, .. } => Self::Status { status },
            RetryError::TransportExhausted { last, .. } => Self::Transient(last.to_string()),
            RetryError::Fatal(e) => Self::Transient(e.to_string()),
        }
    }
}
