//! Search and enrichment API clients.
//!
//! Pipelines depend on the [`SearchProvider`] and [`EnrichmentProvider`]
//! traits; Tavily and Bright Data are the production implementations.

mod brightdata;
mod http;
mod rate_limiter;
mod tavily;

pub use brightdata::BrightDataClient;
pub use http::HttpClient;
pub use rate_limiter::*;
pub use tavily::TavilyClient;

use crate::models::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// One web search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl SearchHit {
    /// Title and snippet joined, as scanned by the extractors.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

/// Web search collaborator.
pub trait SearchProvider: Send + Sync + 'static {
    fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;
}

/// Handle of a submitted enrichment job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    /// Number of keys submitted
    pub submitted: usize,
}

/// Result of polling an enrichment job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Job finished; raw records in provider format
    Ready(Vec<serde_json::Value>),
    /// Still running
    Pending,
}

/// Bulk enrichment collaborator (submit keys, poll for records).
pub trait EnrichmentProvider: Send + Sync + 'static {
    fn submit(&self, keys: &[String]) -> impl Future<Output = Result<JobHandle>> + Send;

    fn poll(&self, handle: &JobHandle) -> impl Future<Output = Result<PollStatus>> + Send;
}
