// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity (court) codes: a built-in list merged with what the upstream
//! currently advertises.

use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::upstream::Upstream;

/// Codes known at build time. The upstream list is merged on top.
pub const KNOWN_ENTITIES: &[&str] = &[
    "CJF", "PJeCor", "SEEU",
    "TRF1", "TRF2", "TRF3", "TRF4", "TRF5", "TRF6",
    "STF", "STJ", "TST", "TSE", "STM", "CNJ",
    "TJAC", "TJAL", "TJAM", "TJAP", "TJBA", "TJCE", "TJDFT", "TJES", "TJGO",
    "TJMA", "TJMG", "TJMS", "TJMT", "TJPA", "TJPB", "TJPE", "TJPI", "TJPR",
    "TJRJ", "TJRN", "TJRO", "TJRR", "TJRS", "TJSC", "TJSE", "TJSP", "TJTO",
    "TJMMG", "TJMRS", "TJMSP",
    "TRT1", "TRT2", "TRT3", "TRT4", "TRT5", "TRT6", "TRT7", "TRT8",
    "TRT9", "TRT10", "TRT11", "TRT12", "TRT13", "TRT14", "TRT15", "TRT16",
    "TRT17", "TRT18", "TRT19", "TRT20", "TRT21", "TRT22", "TRT23", "TRT24",
    "TRE-AC", "TRE-AL", "TRE-AM", "TRE-AP", "TRE-BA", "TRE-CE", "TRE-DF",
    "TRE-ES", "TRE-GO", "TRE-MA", "TRE-MG", "TRE-MS", "TRE-MT", "TRE-PA",
    "TRE-PB", "TRE-PE", "TRE-PI", "TRE-PR", "TRE-RJ", "TRE-RN", "TRE-RO",
    "TRE-RR", "TRE-RS", "TRE-SC", "TRE-SE", "TRE-SP", "TRE-TO",
];

/// Sorted union of [`KNOWN_ENTITIES`] and `advertised`. Blank codes are dropped.
#[must_use]
pub fn merge_entities(advertised: &[String]) -> Vec<String> {
    KNOWN_ENTITIES
        .iter()
        .map(|code| (*code).to_string())
        .chain(advertised.iter().map(|code| code.trim().to_string()))
        .filter(|code| !code.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Entities for this run. The upstream list is best effort: on failure
/// the built-in list is used alone.
pub async fn resolve(upstream: &dyn Upstream) -> Vec<String> {
    let advertised = match upstream.entity_codes().await {
        Ok(codes) => codes,
        Err(e) => {
            warn!(error = %e, "Entity list fetch failed, using built-in list");
            Vec::new()
        }
    };
    let merged = merge_entities(&advertised);
    info!(
        hardcoded = KNOWN_ENTITIES.len(),
        from_api = advertised.len(),
        merged = merged.len(),
        "Entity list loaded"
    );
    merged
}

/// Restrict `entities` to one code requested by the operator. An unknown
/// code is still used, with a warning, so new courts work before the
/// list catches up.
#[must_use]
pub fn select(entities: Vec<String>, only: Option<&str>) -> Vec<String> {
    match only {
        None => entities,
        Some(code) => {
            if !entities.iter().any(|e| e == code) {
                warn!(entity = code, "Entity not in known list, continuing anyway");
            }
            vec![code.to_string()]
        }
    }
}
