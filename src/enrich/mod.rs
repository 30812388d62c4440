//! Enrichment reconciliation: key canonicalization and record matching.

mod canonical;
mod matcher;

pub use canonical::{canonical_key, is_usable_key};
pub use matcher::{
    EnrichmentRecord, ItemRef, MatchReport, Matcher, PendingIndex, RecordExtractor, TargetMatcher,
};
