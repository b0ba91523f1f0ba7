//! Typed errors for page acquisition.
//!
//! Per-page failures never abort a run; the orchestrator logs them and moves on.

use std::time::Duration;
use thiserror::Error;

/// A single navigation or content-retrieval failure. All variants are retried by the fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("page body was empty")]
    EmptyBody,

    #[error("automation session error: {0}")]
    Session(String),
}

/// Raised once a page has used up its retries.
#[derive(Debug, Error)]
#[error("page {page_number} failed after {attempts} attempts: {last}")]
pub struct PermanentFetchError {
    pub page_number: u32,
    pub attempts: u32,
    #[source]
    pub last: FetchError,
}
