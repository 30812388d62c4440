//! Shared HTTP plumbing: retries, backoff and 429 handling.
//!
//! Epistemic foundation:
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Non-2xx responses carry a readable body (might not)
//! - I^B: Network availability unknowable → retry with backoff

use super::RateLimiter;
use crate::models::{AltdataError, ApiError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// reqwest client bound to one provider, with its retry budget.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpClient {
    pub fn new(
        provider: &'static str,
        timeout_secs: u64,
        max_retries: u32,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AltdataError::Network)?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries: max_retries.max(1),
            rate_limiter,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Send the request built by `build`, retrying transient failures.
    ///
    /// Returns the first 2xx response. 401/403 and other 4xx statuses are
    /// not retried.
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_error: Option<AltdataError> = None;

        for attempt in 0..self.max_retries {
            let is_last = attempt + 1 == self.max_retries;
            self.rate_limiter.wait_if_needed(self.provider).await;

            let response = match build(&self.client).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        AltdataError::Timeout(self.timeout)
                    } else {
                        AltdataError::Network(e)
                    });
                    if !is_last {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        debug!(
                            provider = self.provider,
                            attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<f64>().ok());

            if let Some(backoff) = self.rate_limiter.record_response(self.provider, status, retry_after) {
                last_error = Some(AltdataError::RateLimited {
                    retry_after_secs: backoff.as_secs_f64(),
                });
                // The limiter holds the next request until the backoff ends.
                continue;
            }

            if response.status().is_success() {
                return Ok(response);
            }

            let message = response.text().await.unwrap_or_default();
            let error = match status {
                401 | 403 => ApiError::AuthenticationFailed {
                    provider: self.provider,
                },
                _ => ApiError::Rejected {
                    provider: self.provider,
                    status,
                    message: truncate(&message, 300),
                },
            };
            last_error = Some(AltdataError::Api(error));

            // Client errors will not improve on retry.
            if (400..500).contains(&status) {
                break;
            }

            if !is_last {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or(AltdataError::Api(ApiError::MaxRetriesExceeded {
            provider: self.provider,
            attempts: self.max_retries,
        })))
    }

    /// Decode a JSON body, mapping failures to `InvalidResponse`.
    pub async fn json<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            AltdataError::Api(ApiError::InvalidResponse {
                provider: self.provider,
                message: e.to_string(),
            })
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let client = HttpClient::new("tavily", 5, 0, Arc::new(RateLimiter::default())).unwrap();
        assert_eq!(client.max_retries, 1);
        assert_eq!(client.provider(), "tavily");
    }
}
