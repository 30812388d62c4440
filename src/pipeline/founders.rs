//! Founder discovery: company → founder names → verified profile keys.
//!
//! Epistemic foundation:
//! - K_i: A verified profile URL becomes the item's lookup key (status pending)
//! - K_i: A location quoted in the profile snippet resolves the item directly
//! - B_i: Search snippets may name no founders → empty payload, still recorded
//! - B_i: A profile search may fail for one founder → item stays unresolved
//! - I^R: Results per query are configurable

use super::batch::{UnitProcessor, UnitRequest};
use super::extract::{FounderExtractor, LocationExtractor, find_profile};
use crate::checkpoint::CheckpointStore;
use crate::client::SearchProvider;
use crate::enrich::{TargetMatcher, canonical_key};
use crate::models::{AltdataError, EnrichmentStatus, Result, SubItem};
use crate::pool::LookupPool;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A verified profile and the location its snippet mentions, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileMatch {
    pub url: String,
    pub location: Option<String>,
}

/// Searches for a person's profile and verifies it against their name.
pub struct ProfileFinder<S> {
    search: Arc<S>,
    max_results: usize,
    locations: LocationExtractor,
    target: TargetMatcher,
}

impl<S: SearchProvider> ProfileFinder<S> {
    pub fn new(search: Arc<S>, max_results: usize, target: TargetMatcher) -> Result<Self> {
        Ok(Self {
            search,
            max_results,
            locations: LocationExtractor::new()?,
            target,
        })
    }

    /// Verified profile for `name`, trying with the company first.
    pub async fn find(&self, name: &str, company: &str) -> Result<Option<ProfileMatch>> {
        let queries = [
            format!("\"{name}\" \"{company}\" LinkedIn"),
            format!("\"{name}\" LinkedIn profile"),
        ];
        for query in &queries {
            let hits = self.search.search(query, self.max_results).await?;
            if let Some((url, hit)) = find_profile(&hits, name) {
                let location = self.locations.extract(&hit.text());
                debug!(name, url = %url, location = ?location, "Verified profile");
                return Ok(Some(ProfileMatch { url, location }));
            }
        }
        Ok(None)
    }

    /// Attach a verified profile to an item.
    ///
    /// With a snippet location the item is resolved here and never reaches
    /// the enrichment provider; otherwise it waits as `pending`.
    pub fn attach(&self, item: &mut SubItem, profile: &ProfileMatch) {
        item.set_lookup_key(canonical_key(&profile.url));
        item.attributes
            .insert("profile_url".to_string(), profile.url.clone());

        let (confidence, method) = match &profile.location {
            Some(location) => {
                item.resolve(location.clone(), self.target.is_target(location));
                ("HIGH", "search_snippet")
            }
            None => ("MEDIUM", "profile_no_location"),
        };
        item.attributes
            .insert("location_confidence".to_string(), confidence.to_string());
        item.attributes
            .insert("verification_method".to_string(), method.to_string());
    }
}

/// Unit processor for the founders pipeline.
pub struct FounderLookup<S> {
    search: Arc<S>,
    extractor: FounderExtractor,
    profiles: ProfileFinder<S>,
    max_results: usize,
}

impl<S: SearchProvider> FounderLookup<S> {
    pub fn new(search: Arc<S>, max_results: usize, target: TargetMatcher) -> Result<Self> {
        Ok(Self {
            profiles: ProfileFinder::new(Arc::clone(&search), max_results, target)?,
            extractor: FounderExtractor::new()?,
            search,
            max_results,
        })
    }
}

impl<S: SearchProvider> UnitProcessor for FounderLookup<S> {
    async fn process(&self, unit: UnitRequest) -> Result<Vec<SubItem>> {
        let hits = self
            .search
            .search(&format!("{} founders", unit.name), self.max_results)
            .await?;
        let mut founders = self.extractor.extract(&hits);
        if founders.is_empty() {
            debug!(company = %unit.name, "No founders found");
        }

        for founder in &mut founders {
            match self.profiles.find(&founder.name, &unit.name).await {
                Ok(Some(profile)) => self.profiles.attach(founder, &profile),
                Ok(None) => {}
                // Left unresolved; `discover` retries it later.
                Err(e) if e.is_transient() => {
                    warn!(founder = %founder.name, error = %e, "Profile search failed")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(founders)
    }
}

/// Counts from a profile discovery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySummary {
    /// Unresolved items with a name
    pub candidates: usize,
    /// Profiles found and verified
    pub verified: usize,
    /// Verified profiles whose snippet resolved the location
    pub located: usize,
    /// Searches that found no verified profile
    pub not_found: usize,
    /// Searches that failed
    pub failed: usize,
    /// Chunks saved
    pub chunks: usize,
    /// Candidates left for a later run after an interrupt
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    unit_index: usize,
    sub_item_index: usize,
    name: String,
    company: String,
}

/// Find profile keys for every unresolved item, saving once per chunk.
pub async fn discover_profiles<S: SearchProvider>(
    store: &mut CheckpointStore,
    finder: Arc<ProfileFinder<S>>,
    pool: &LookupPool,
    chunk_size: usize,
    shutdown: &CancellationToken,
) -> Result<DiscoverySummary> {
    let candidates: Vec<Candidate> = store
        .state()
        .results
        .iter()
        .flat_map(|result| {
            result
                .payload()
                .iter()
                .enumerate()
                .filter(|(_, item)| {
                    item.status == EnrichmentStatus::Unresolved && !item.name.trim().is_empty()
                })
                .map(|(sub_item_index, item)| Candidate {
                    unit_index: result.unit_index,
                    sub_item_index,
                    name: item.name.clone(),
                    company: result.unit_name.clone(),
                })
        })
        .collect();

    let mut summary = DiscoverySummary {
        candidates: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        info!("Every item already has a lookup key");
        return Ok(summary);
    }
    info!(candidates = candidates.len(), chunk_size, "Discovering missing profiles");

    let chunk_size = chunk_size.max(1);
    for (n, chunk) in candidates.chunks(chunk_size).enumerate() {
        if shutdown.is_cancelled() {
            summary.skipped = candidates.len() - n * chunk_size;
            warn!(skipped = summary.skipped, "Interrupted, stopping discovery");
            break;
        }

        let worker_finder = Arc::clone(&finder);
        let outcomes = pool
            .map(chunk.to_vec(), move |candidate| {
                let finder = Arc::clone(&worker_finder);
                async move { finder.find(&candidate.name, &candidate.company).await }
            })
            .await;

        let mut found = Vec::new();
        let mut fatal = None;
        for (candidate, outcome) in chunk.iter().zip(outcomes) {
            match outcome {
                Ok(Some(profile)) => found.push((candidate, profile)),
                Ok(None) => summary.not_found += 1,
                Err(e) if e.is_transient() || matches!(e, AltdataError::TaskAborted(_)) => {
                    warn!(name = %candidate.name, error = %e, "Profile search failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }

        let verified = store.update(|state| {
            let mut applied = 0;
            for (candidate, profile) in &found {
                let item = state
                    .position_of(candidate.unit_index)
                    .and_then(|pos| state.results.get_mut(pos))
                    .and_then(|result| result.payload_mut())
                    .and_then(|payload| payload.get_mut(candidate.sub_item_index));
                if let Some(item) = item {
                    finder.attach(item, profile);
                    applied += 1;
                }
            }
            Ok(applied)
        })?;
        summary.verified += verified;
        summary.located += found.iter().filter(|(_, p)| p.location.is_some()).count();
        summary.chunks += 1;

        info!(
            chunk = n + 1,
            verified,
            not_found = chunk.len() - found.len(),
            "Discovery chunk saved"
        );

        // Profiles verified alongside the failure are saved above.
        if let Some(e) = fatal {
            return Err(e);
        }
    }

    Ok(summary)
}
