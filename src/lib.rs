//! altdata - Resumable alternative-data collection pipelines.
//!
//! ## Architecture
//!
//! Each pipeline walks an input CSV one unit (row) at a time, looks the unit
//! up through external search, and records what it found in a durable
//! checkpoint. Sub-items found for a unit (founders, listings) carry a
//! lookup key that a bulk enrichment job later resolves into a value.
//!
//! - **Checkpoint Store**: Atomic persistence, resume cursor, reset/archive
//! - **Lookup Pool**: Bounded concurrent lookups; only the coordinator writes
//! - **Matcher**: Reconciles enrichment records with pending sub-items
//! - **Exporter**: Flattens the checkpoint back onto the input rows
//!
//! ## Pipelines
//!
//! - **Founders**: Company → founder names → verified profile → location
//! - **Listings**: Business → listing page (search cascade) → enrichment
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Checkpoint invariants enforced on every save
//! - B_i (Beliefs): Per-unit lookups may fail → recorded as failures
//! - I^R (Resolvable): Columns, budgets, keywords come from config
//! - I^B (Bounded): Network/API uncertainties (retry, backoff, poll budget)

pub mod checkpoint;
pub mod client;
pub mod enrich;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use client::{BrightDataClient, RateLimiter, TavilyClient};
pub use enrich::{MatchReport, Matcher};
pub use models::{AltdataError, Config, InputTable, Result, SubItem, WorkResult};
pub use pipeline::{BatchRunner, EnrichmentRun, FounderLookup, ListingLookup};
pub use pool::LookupPool;
