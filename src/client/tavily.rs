//! Tavily web search client.
//!
//! Epistemic foundation:
//! - K_i: Tavily answers POST /search with a `results` array
//! - B_i: Each result carries url, title and content (fields may be missing)
//! - I^B: Quota and latency unknowable → shared rate limiter + retries

use super::http::HttpClient;
use super::{RateLimiter, SearchHit, SearchProvider};
use crate::models::{Result, TavilyConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Tavily search API client.
pub struct TavilyClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl TavilyClient {
    pub fn new(api_key: String, config: &TavilyConfig, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("tavily", config.timeout_secs, config.max_retries, rate_limiter)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SearchProvider for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);
        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            search_depth: "basic",
            max_results,
        };

        let response = self.http.send(|client| client.post(&url).json(&request)).await?;
        let body: SearchResponse = self.http.json(response).await?;

        debug!(query, hits = body.results.len(), "Search complete");
        Ok(body.results)
    }
}
