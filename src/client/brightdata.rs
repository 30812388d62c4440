//! Bright Data dataset client (trigger a collection, download its snapshot).
//!
//! Epistemic foundation:
//! - K_i: POST /trigger returns a `snapshot_id`
//! - K_i: GET /snapshot/{id} answers 202 (or a status object) while running
//! - B_i: A finished snapshot is a JSON array of records
//! - I^B: Collection time unknowable → caller polls with a bounded budget

use super::http::HttpClient;
use super::{EnrichmentProvider, JobHandle, PollStatus, RateLimiter};
use crate::models::{AltdataError, ApiError, BrightDataConfig, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct TriggerInput<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    snapshot_id: Option<String>,
}

/// Bright Data dataset API client.
pub struct BrightDataClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
    dataset_id: String,
}

impl BrightDataClient {
    pub fn new(api_key: String, config: &BrightDataConfig, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(
                "brightdata",
                config.timeout_secs,
                config.max_retries,
                rate_limiter,
            )?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dataset_id: config.dataset_id.clone(),
        })
    }

    fn invalid(&self, message: impl Into<String>) -> AltdataError {
        AltdataError::Api(ApiError::InvalidResponse {
            provider: self.http.provider(),
            message: message.into(),
        })
    }
}

/// Interpret a snapshot body.
///
/// Arrays are finished snapshots; objects with a `status` field are
/// progress reports.
fn parse_snapshot(body: Value) -> std::result::Result<PollStatus, String> {
    match body {
        Value::Array(records) => Ok(PollStatus::Ready(records)),
        Value::Object(map) => match map.get("status").and_then(Value::as_str) {
            Some("running" | "building" | "collecting" | "starting") => Ok(PollStatus::Pending),
            Some("failed") => Err(format!(
                "snapshot failed: {}",
                map.get("message").and_then(Value::as_str).unwrap_or("no message")
            )),
            Some(other) => Err(format!("unexpected snapshot status '{other}'")),
            None => Err("snapshot response is neither records nor a status".to_string()),
        },
        other => Err(format!("unexpected snapshot body: {other}")),
    }
}

impl EnrichmentProvider for BrightDataClient {
    async fn submit(&self, keys: &[String]) -> Result<JobHandle> {
        let url = format!("{}/trigger", self.base_url);
        let inputs: Vec<TriggerInput<'_>> = keys.iter().map(|k| TriggerInput { url: k }).collect();

        let response = self
            .http
            .send(|client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("dataset_id", self.dataset_id.as_str()), ("include_errors", "true")])
                    .json(&inputs)
            })
            .await?;
        let body: TriggerResponse = self.http.json(response).await?;

        let id = body
            .snapshot_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| self.invalid("trigger response has no snapshot_id"))?;

        info!(snapshot_id = %id, keys = keys.len(), "Enrichment job submitted");
        Ok(JobHandle {
            id,
            submitted: keys.len(),
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus> {
        let url = format!("{}/snapshot/{}", self.base_url, handle.id);
        let response = self
            .http
            .send(|client| {
                client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("format", "json")])
            })
            .await?;

        if response.status().as_u16() == 202 {
            debug!(snapshot_id = %handle.id, "Snapshot not ready");
            return Ok(PollStatus::Pending);
        }

        let body: Value = self.http.json(response).await?;
        parse_snapshot(body).map_err(|message| self.invalid(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_is_ready() {
        let status = parse_snapshot(json!([{"url": "x"}])).unwrap();
        assert_eq!(status, PollStatus::Ready(vec![json!({"url": "x"})]));
    }

    #[test]
    fn test_running_status_is_pending() {
        assert_eq!(
            parse_snapshot(json!({"status": "running", "message": "Snapshot is not ready yet"})).unwrap(),
            PollStatus::Pending
        );
    }

    #[test]
    fn test_failed_snapshot_is_error() {
        let err = parse_snapshot(json!({"status": "failed", "message": "quota"})).unwrap_err();
        assert!(err.contains("quota"));
        assert!(parse_snapshot(json!("nope")).is_err());
    }

    #[test]
    fn test_trigger_body_shape() {
        let keys = vec!["https://linkedin.com/in/ada".to_string()];
        let inputs: Vec<TriggerInput<'_>> = keys.iter().map(|k| TriggerInput { url: k }).collect();
        assert_eq!(
            serde_json::to_value(&inputs).unwrap(),
            json!([{"url": "https://linkedin.com/in/ada"}])
        );
    }
}
