//! Error types for altdata.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad input, duplicate unit)
//! - I^B materialized: Infrastructure failures (network, timeout, polling budget)
//! - K_i violated: Persisted state no longer satisfies its invariants

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for altdata.
#[derive(Debug, Error)]
pub enum AltdataError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED - Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unit {0} is already recorded in the checkpoint")]
    DuplicateUnit(usize),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED - Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════
    #[error("{provider} API error: {0}", provider = .0.provider())]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("Worker task aborted: {0}")]
    TaskAborted(String),

    #[error("Enrichment job {job_id} still pending after {attempts} polls")]
    EnrichmentTimeout { job_id: String, attempts: u32 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {context}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED - Invariant broken
    // ═══════════════════════════════════════════════════════════════════
    #[error("Corrupt checkpoint {path}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by the third-party search and enrichment APIs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed { provider: &'static str },

    #[error("Request rejected (status {status}): {message}")]
    Rejected {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("Request failed after {attempts} attempts")]
    MaxRetriesExceeded {
        provider: &'static str,
        attempts: u32,
    },
}

impl ApiError {
    /// Name of the API that produced the error.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed { provider }
            | Self::Rejected { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::MaxRetriesExceeded { provider, .. } => provider,
        }
    }
}

impl AltdataError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a CSV error with context.
    pub fn csv(context: impl Into<String>, source: csv::Error) -> Self {
        Self::Csv {
            context: context.into(),
            source,
        }
    }

    /// Create a corrupt-checkpoint error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_)
        )
    }

    /// Whether this error is a transient, unit-level failure.
    ///
    /// Transient failures are downgraded to a recorded `Failure` outcome;
    /// everything else aborts the batch. Rejected credentials and 4xx
    /// responses are configuration problems that every later unit would hit
    /// too, so they are not transient. A 429 surfaces as `RateLimited`.
    pub fn is_transient(&self) -> bool {
        if self.is_retryable() {
            return true;
        }
        match self {
            Self::ParseError(_) => true,
            Self::Api(api) => match api {
                ApiError::MaxRetriesExceeded { .. } | ApiError::InvalidResponse { .. } => true,
                ApiError::Rejected { status, .. } => *status >= 500,
                ApiError::AuthenticationFailed { .. } => false,
            },
            _ => false,
        }
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result type alias for altdata.
pub type Result<T> = std::result::Result<T, AltdataError>;
