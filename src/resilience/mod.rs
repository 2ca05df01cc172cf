// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure handling for network collaborators: retry with backoff for every
//! call, and a circuit breaker in front of archive uploads.

pub mod circuit_breaker;
pub mod retry;
