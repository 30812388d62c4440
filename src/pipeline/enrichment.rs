//! Bulk enrichment of pending items: submit keys, poll, reconcile.
//!
//! Epistemic foundation:
//! - K_i: Keys come from the pending index, one job per chunk
//! - K_i: Each finished chunk is reconciled and saved before the next starts
//! - B_i: A job may never finish → bounded polling, chunk marked incomplete
//! - I^B: Unmatched items stay pending for a later run

use crate::checkpoint::CheckpointStore;
use crate::client::{EnrichmentProvider, JobHandle, PollStatus};
use crate::enrich::{MatchReport, Matcher, PendingIndex};
use crate::models::{AltdataError, BrightDataConfig, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chunking and polling budget for a bulk enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    pub chunk_size: usize,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl From<&BrightDataConfig> for EnrichmentOptions {
    fn from(config: &BrightDataConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            poll_attempts: config.poll_attempts,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

/// Outcome of a bulk enrichment run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentSummary {
    /// Distinct keys submitted or due to be submitted
    pub keys: usize,
    /// Chunks attempted
    pub chunks: usize,
    pub completed_chunks: usize,
    /// Chunks that failed or ran out of polls; their items stay pending
    pub incomplete_chunks: usize,
    /// Chunks not attempted after an interrupt
    pub skipped_chunks: usize,
    pub report: MatchReport,
    /// Matchable items still pending after the run
    pub still_pending: usize,
}

/// Drives an [`EnrichmentProvider`] over every pending key.
pub struct EnrichmentRun<E> {
    provider: Arc<E>,
    matcher: Matcher,
    options: EnrichmentOptions,
    shutdown: CancellationToken,
}

impl<E: EnrichmentProvider> EnrichmentRun<E> {
    pub fn new(
        provider: Arc<E>,
        matcher: Matcher,
        options: EnrichmentOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            matcher,
            options,
            shutdown,
        }
    }

    pub async fn run(&self, store: &mut CheckpointStore) -> Result<EnrichmentSummary> {
        let index = PendingIndex::build(store.state());
        let keys = index.keys();
        let chunk_size = self.options.chunk_size.max(1);

        let mut summary = EnrichmentSummary {
            keys: keys.len(),
            ..Default::default()
        };
        summary.report.unmatchable = index.unmatchable().len();

        if keys.is_empty() {
            info!("No pending items to enrich");
            return Ok(summary);
        }

        let total_chunks = keys.len().div_ceil(chunk_size);
        info!(keys = keys.len(), chunks = total_chunks, "Starting bulk enrichment");

        for (n, chunk) in keys.chunks(chunk_size).enumerate() {
            if self.shutdown.is_cancelled() {
                summary.skipped_chunks = total_chunks - n;
                warn!(skipped = summary.skipped_chunks, "Interrupted, stopping enrichment");
                break;
            }
            summary.chunks += 1;

            let urls: Vec<String> = chunk.iter().map(|key| format!("https://{key}")).collect();
            match self.fetch(&urls).await {
                Ok(Some(records)) => {
                    let report = self.matcher.reconcile(store, &records)?;
                    summary.report.merge(&report);
                    summary.completed_chunks += 1;
                    info!(
                        chunk = n + 1,
                        of = total_chunks,
                        resolved = report.resolved,
                        "Enrichment chunk saved"
                    );
                }
                Ok(None) => {
                    summary.incomplete_chunks += 1;
                    warn!(chunk = n + 1, "Interrupted while polling");
                }
                Err(e @ AltdataError::EnrichmentTimeout { .. }) => {
                    summary.incomplete_chunks += 1;
                    warn!(chunk = n + 1, error = %e, "Enrichment chunk incomplete");
                }
                Err(e) if e.is_transient() => {
                    summary.incomplete_chunks += 1;
                    warn!(chunk = n + 1, error = %e, "Enrichment chunk failed");
                }
                Err(e) => return Err(e),
            }
        }

        summary.still_pending = PendingIndex::build(store.state()).len();
        Ok(summary)
    }

    /// Submit one chunk and wait for its records. `None` on interrupt.
    async fn fetch(&self, urls: &[String]) -> Result<Option<Vec<Value>>> {
        let handle = self.provider.submit(urls).await?;
        self.await_records(&handle).await
    }

    async fn await_records(&self, handle: &JobHandle) -> Result<Option<Vec<Value>>> {
        for attempt in 1..=self.options.poll_attempts {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }

            match self.provider.poll(handle).await {
                Ok(PollStatus::Ready(records)) if !records.is_empty() => {
                    debug!(job = %handle.id, attempt, records = records.len(), "Job ready");
                    return Ok(Some(records));
                }
                // An empty snapshot is still being assembled.
                Ok(PollStatus::Ready(_)) | Ok(PollStatus::Pending) => {
                    debug!(job = %handle.id, attempt, "Job pending");
                }
                Err(e) if e.is_transient() => {
                    warn!(job = %handle.id, attempt, error = %e, "Poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AltdataError::EnrichmentTimeout {
            job_id: handle.id.clone(),
            attempts: self.options.poll_attempts,
        })
    }
}

/// Records from a JSON file: either an array or `{"records": [...]}`.
pub fn read_records_file(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AltdataError::io(format!("Failed to read {}", path.display()), e))?;
    let body: Value = serde_json::from_str(&content)
        .map_err(|e| AltdataError::ParseError(format!("{}: {e}", path.display())))?;

    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(AltdataError::ParseError(format!(
                "{}: expected a 'records' array",
                path.display()
            ))),
        },
        _ => Err(AltdataError::ParseError(format!(
            "{}: expected a JSON array of records",
            path.display()
        ))),
    }
}

/// Apply records produced outside the pipeline.
pub fn apply_records_file(store: &mut CheckpointStore, matcher: &Matcher, path: &Path) -> Result<MatchReport> {
    let records = read_records_file(path)?;
    info!(path = %path.display(), records = records.len(), "Applying records from file");
    matcher.reconcile(store, &records)
}
