//! Bounded pool for independent lookups.
//!
//! Epistemic foundation:
//! - K_i: At most `size` lookups are in flight at once
//! - K_i: Results come back in input order, whatever order tasks finish in
//! - B_i: Each lookup may fail → Result per input
//! - I^B: A task may panic → surfaced as an error for that input only

use crate::models::{AltdataError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Semaphore-bounded task pool. Workers never see the checkpoint.
#[derive(Debug, Clone)]
pub struct LookupPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl LookupPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over every input concurrently.
    ///
    /// The returned vector is aligned with `inputs`.
    pub async fn map<I, T, F, Fut>(&self, inputs: Vec<I>, f: F) -> Vec<Result<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let f = Arc::new(f);
        let mut handles = Vec::with_capacity(inputs.len());

        for input in inputs {
            let f = Arc::clone(&f);
            let semaphore = Arc::clone(&self.semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| AltdataError::Internal("Semaphore closed".to_string()))?;
                f(input).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (position, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(position, error = %e, "Lookup task panicked");
                    results.push(Err(AltdataError::TaskAborted(e.to_string())));
                }
            }
        }
        results
    }
}
