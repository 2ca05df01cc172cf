// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Internet Archive S3 credentials.
//!
//! Resolution order:
//! 1. `IAS3_ACCESS_KEY` / `IAS3_SECRET_KEY`
//! 2. the `[s3]` section (`access`, `secret`) of
//!    `~/.config/internetarchive/ia.ini`

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::BackupError;

pub const ACCESS_KEY_VAR: &str = "IAS3_ACCESS_KEY";
pub const SECRET_KEY_VAR: &str = "IAS3_SECRET_KEY";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access: String,
    secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &self.access)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// `None` when either half is blank.
    #[must_use]
    pub fn new(access: &str, secret: &str) -> Option<Self> {
        let (access, secret) = (access.trim(), secret.trim());
        if access.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self {
            access: access.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Placeholder for runs that never upload.
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            access: "dry-run".to_string(),
            secret: "dry-run".to_string(),
        }
    }

    /// Value for the S3 `authorization` header.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("LOW {}:{}", self.access, self.secret)
    }
}

/// Default location of the `ia` CLI config file.
#[must_use]
pub fn default_ini_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("internetarchive").join("ia.ini"))
}

/// Resolve from the process environment and the default ini file.
pub fn resolve() -> Result<Credentials, BackupError> {
    resolve_with(|key| std::env::var(key).ok(), default_ini_path().as_deref())
}

/// Resolve from an arbitrary environment lookup and ini path.
pub fn resolve_with(env: impl Fn(&str) -> Option<String>, ini: Option<&Path>) -> Result<Credentials, BackupError> {
    let from_env = env(ACCESS_KEY_VAR)
        .zip(env(SECRET_KEY_VAR))
        .and_then(|(access, secret)| Credentials::new(&access, &secret));
    if let Some(creds) = from_env {
        debug!("Archive credentials from environment");
        return Ok(creds);
    }

    if let Some(path) = ini {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Some(creds) = parse_ini(&raw) {
                debug!(path = %path.display(), "Archive credentials from ia.ini");
                return Ok(creds);
            }
        }
    }

    Err(BackupError::Credentials(format!(
        "set {ACCESS_KEY_VAR} and {SECRET_KEY_VAR}, or configure the [s3] section of ~/.config/internetarchive/ia.ini"
    )))
}

/// Pull `access` and `secret` out of the `[s3]` section.
#[must_use]
pub fn parse_ini(raw: &str) -> Option<Credentials> {
    let mut in_s3 = false;
    let (mut access, mut secret) = (None, None);
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_s3 = section.trim().eq_ignore_ascii_case("s3");
            continue;
        }
        if !in_s3 {
            continue;
        }
        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "access" => access = Some(value.trim().to_string()),
            "secret" => secret = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Credentials::new(&access?, &secret?)
}
