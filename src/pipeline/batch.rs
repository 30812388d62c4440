//! Batch runner: plan, look up concurrently, record in order.
//!
//! Epistemic foundation:
//! - K_i: Only the runner writes the checkpoint; workers return values
//! - K_i: Results are recorded in unit_index order, one save per unit
//! - B_i: A unit lookup may fail → transient failures become Failure outcomes
//! - I^B: Interrupts can arrive at any time → checked between chunks

use crate::checkpoint::{CheckpointStore, PlannedUnit, UnitSource, next_batch, remaining};
use crate::models::{
    AltdataError, ApiError, BatchSummary, EnrichmentStatus, FailureKind, InputRow, InputTable,
    Result, SubItem, WorkResult,
};
use crate::pool::LookupPool;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One input row handed to a worker, detached from the table.
#[derive(Debug, Clone, Default)]
pub struct UnitRequest {
    pub index: usize,
    pub name: String,
    /// Column name → cell value
    pub fields: BTreeMap<String, String>,
}

impl UnitRequest {
    pub fn from_row(index: usize, row: &InputRow, headers: &[String]) -> Self {
        Self {
            index,
            name: row.name.clone(),
            fields: headers.iter().cloned().zip(row.values.iter().cloned()).collect(),
        }
    }

    /// Cell value for `column`, empty if absent.
    pub fn field(&self, column: &str) -> &str {
        self.fields.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Performs the lookup for one unit of work.
pub trait UnitProcessor: Send + Sync + 'static {
    fn process(&self, unit: UnitRequest) -> impl Future<Output = Result<Vec<SubItem>>> + Send;
}

/// Limits for one `run` invocation.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_total: Option<usize>,
    /// Units looked up concurrently before their results are recorded
    pub chunk_size: usize,
    pub show_progress: bool,
}

/// Drives a processor over the next batch of input units.
pub struct BatchRunner<P> {
    processor: Arc<P>,
    pool: LookupPool,
    shutdown: CancellationToken,
}

impl<P: UnitProcessor> BatchRunner<P> {
    pub fn new(processor: Arc<P>, pool: LookupPool, shutdown: CancellationToken) -> Self {
        Self {
            processor,
            pool,
            shutdown,
        }
    }

    /// Process the next batch and record every finished unit.
    ///
    /// Marks the checkpoint complete once no input remains.
    pub async fn run(
        &self,
        store: &mut CheckpointStore,
        input: &InputTable,
        options: &BatchOptions,
    ) -> Result<BatchSummary> {
        let start = Instant::now();
        let mut summary = BatchSummary::default();

        let planned = next_batch(store.state(), input, options.batch_size, options.max_total);
        if planned.is_empty() {
            if remaining(store.state(), input) == 0 {
                store.mark_complete()?;
                info!(total = input.len(), "All units processed");
            } else {
                info!(
                    total_processed = store.state().total_processed,
                    "max_total reached, nothing to do"
                );
            }
            return Ok(summary);
        }

        info!(
            units = planned.len(),
            first = planned[0].index,
            resume_from = store.state().resume_index(),
            workers = self.pool.size(),
            "Processing batch"
        );

        let pb = if options.show_progress {
            let pb = ProgressBar::new(planned.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            {
                pb.set_style(style.progress_chars("##-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let chunk_size = options.chunk_size.max(1);
        for (n, chunk) in planned.chunks(chunk_size).enumerate() {
            if self.shutdown.is_cancelled() {
                summary.skipped = planned.len() - n * chunk_size;
                warn!(skipped = summary.skipped, "Interrupted, stopping before next chunk");
                break;
            }

            let outcomes = self.process_chunk(chunk, input.headers()).await;
            for (planned_unit, outcome) in chunk.iter().zip(outcomes) {
                let result = match outcome {
                    Ok(result) => result,
                    Err(e) => {
                        pb.abandon_with_message("aborted");
                        return Err(e);
                    }
                };
                tally(&mut summary, &result);
                store.record(result)?;
                pb.inc(1);
                pb.set_message(format!(
                    "{} items, {} failed | {}",
                    summary.items, summary.failed, planned_unit.unit.name
                ));
            }
        }
        pb.finish_with_message(format!("{} items, {} failed", summary.items, summary.failed));

        if remaining(store.state(), input) == 0 {
            store.mark_complete()?;
        }

        summary.runtime_secs = start.elapsed().as_secs_f64();
        summary.finalize();

        info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            items = summary.items,
            pending = summary.pending,
            throughput = format!("{:.0}/hr", summary.throughput_per_hour),
            "Batch complete"
        );
        Ok(summary)
    }

    /// Look up a chunk concurrently; outputs are aligned with `chunk`.
    async fn process_chunk(
        &self,
        chunk: &[PlannedUnit<'_, InputRow>],
        headers: &[String],
    ) -> Vec<Result<WorkResult>> {
        let requests: Vec<UnitRequest> = chunk
            .iter()
            .map(|p| UnitRequest::from_row(p.index, p.unit, headers))
            .collect();
        let names: Vec<(usize, String)> = requests.iter().map(|r| (r.index, r.name.clone())).collect();

        let processor = Arc::clone(&self.processor);
        let outcomes = self
            .pool
            .map(requests, move |request| {
                let processor = Arc::clone(&processor);
                async move { processor.process(request).await }
            })
            .await;

        names
            .into_iter()
            .zip(outcomes)
            .map(|((index, name), outcome)| to_work_result(index, name, outcome))
            .collect()
    }
}

/// Convert a worker outcome into a recordable result.
///
/// Transient and aborted lookups become `Failure` outcomes; anything else
/// is returned as an error and stops the batch.
pub fn to_work_result(index: usize, name: String, outcome: Result<Vec<SubItem>>) -> Result<WorkResult> {
    match outcome {
        Ok(items) => Ok(WorkResult::success(index, name, items)),
        Err(e) => {
            let kind = if matches!(e, AltdataError::TaskAborted(_)) {
                FailureKind::Aborted
            } else if matches!(
                e,
                AltdataError::ParseError(_) | AltdataError::Api(ApiError::InvalidResponse { .. })
            ) {
                FailureKind::InvalidResponse
            } else if e.is_transient() {
                FailureKind::TransientIo
            } else {
                return Err(e);
            };
            warn!(unit_index = index, unit = %name, error = %e, kind = kind.as_str(), "Unit failed");
            Ok(WorkResult::failure(index, name, kind, e.to_string()))
        }
    }
}

fn tally(summary: &mut BatchSummary, result: &WorkResult) {
    summary.processed += 1;
    if result.is_failure() {
        summary.failed += 1;
    }
    for item in result.payload() {
        summary.items += 1;
        if item.status == EnrichmentStatus::Pending {
            summary.pending += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use crate::models::UnitOutcome;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails on configured names, panics on "PANIC", otherwise one item.
    struct FakeProcessor {
        transient: Vec<String>,
        fatal: Vec<String>,
        bad_key: bool,
        seen: Mutex<Vec<usize>>,
    }

    impl FakeProcessor {
        fn new() -> Self {
            Self {
                transient: vec![],
                fatal: vec![],
                bad_key: false,
                seen: Mutex::new(vec![]),
            }
        }
    }

    impl UnitProcessor for FakeProcessor {
        async fn process(&self, unit: UnitRequest) -> Result<Vec<SubItem>> {
            self.seen.lock().unwrap().push(unit.index);
            // Reverse completion order inside a chunk.
            tokio::time::sleep(Duration::from_millis(30 - (unit.index as u64 % 10) * 3)).await;
            if unit.name == "PANIC" {
                panic!("worker blew up");
            }
            if self.bad_key {
                return Err(ApiError::AuthenticationFailed { provider: "tavily" }.into());
            }
            if self.transient.contains(&unit.name) {
                return Err(AltdataError::Timeout(Duration::from_secs(1)));
            }
            if self.fatal.contains(&unit.name) {
                return Err(AltdataError::corrupt("x", "fatal"));
            }
            Ok(vec![
                SubItem::new(format!("{} Founder", unit.name)).with_lookup_key(format!("x.com/{}", unit.index)),
            ])
        }
    }

    fn table(n: usize) -> InputTable {
        let mut csv = String::from("name,city\n");
        for i in 0..n {
            csv.push_str(&format!("c{i},Austin\n"));
        }
        InputTable::from_reader(csv.as_bytes(), "name").unwrap()
    }

    fn options(batch_size: usize) -> BatchOptions {
        BatchOptions {
            batch_size,
            max_total: None,
            chunk_size: 4,
            show_progress: false,
        }
    }

    fn runner(processor: FakeProcessor) -> BatchRunner<FakeProcessor> {
        BatchRunner::new(Arc::new(processor), LookupPool::new(3), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_records_in_index_order_and_resumes() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let input = table(12);
        let runner = runner(FakeProcessor::new());

        let summary = runner.run(&mut store, &input, &options(7)).await.unwrap();
        assert_eq!(summary.processed, 7);
        assert_eq!(summary.pending, 7);
        let order: Vec<usize> = store.state().results.iter().map(|r| r.unit_index).collect();
        assert_eq!(order, (0..7).collect::<Vec<_>>());

        // Reopen as a fresh process would.
        drop(store);
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let summary = runner.run(&mut store, &input, &options(7)).await.unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(store.state().total_processed, 12);
        assert_eq!(store.state().status, CheckpointStatus::Complete);

        let seen = runner.processor.seen.lock().unwrap().clone();
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), seen.len(), "a unit was processed twice");
    }

    #[tokio::test]
    async fn test_split_run_matches_single_pass() {
        let dir = TempDir::new().unwrap();
        let input = table(12);

        let mut split = CheckpointStore::open(&dir.path().join("split.json"), "founders").unwrap();
        let split_runner = runner(FakeProcessor::new());
        split_runner.run(&mut split, &input, &options(7)).await.unwrap();
        split_runner.run(&mut split, &input, &options(7)).await.unwrap();

        let mut single = CheckpointStore::open(&dir.path().join("single.json"), "founders").unwrap();
        runner(FakeProcessor::new()).run(&mut single, &input, &options(12)).await.unwrap();

        let payloads = |store: &CheckpointStore| {
            store
                .state()
                .results
                .iter()
                .map(|r| (r.unit_index, r.unit_name.clone(), r.outcome.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(payloads(&split), payloads(&single));
        assert_eq!(split.state().last_processed_index, single.state().last_processed_index);
        assert_eq!(split.state().total_processed, single.state().total_processed);
        assert_eq!(split.state().status, single.state().status);
    }

    #[tokio::test]
    async fn test_rejected_credentials_abort_without_consuming_units() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let input = table(4);
        let mut processor = FakeProcessor::new();
        processor.bad_key = true;

        let err = runner(processor).run(&mut store, &input, &options(4)).await.unwrap_err();
        assert!(matches!(err, AltdataError::Api(ApiError::AuthenticationFailed { .. })));
        assert_eq!(store.state().last_processed_index, -1);
        assert!(store.state().results.is_empty());
        assert_ne!(store.state().status, CheckpointStatus::Complete);

        // A rerun with a fixed key still sees every unit.
        let reopened = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        assert_eq!(next_batch(reopened.state(), &input, 4, None).len(), 4);
    }

    #[tokio::test]
    async fn test_transient_failures_are_recorded_and_batch_continues() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let mut processor = FakeProcessor::new();
        processor.transient = vec!["c2".to_string()];

        let summary = runner(processor).run(&mut store, &table(5), &options(10)).await.unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.failed, 1);
        let failed = &store.state().results[2];
        assert!(failed.is_failure());
        assert!(failed.error().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_fatal_error_keeps_earlier_units() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let mut processor = FakeProcessor::new();
        processor.fatal = vec!["c5".to_string()];

        let err = runner(processor).run(&mut store, &table(8), &options(8)).await.unwrap_err();
        assert!(matches!(err, AltdataError::CorruptCheckpoint { .. }));
        assert_eq!(store.state().last_processed_index, 4);
        let reread = CheckpointStore::read(store.path()).unwrap().unwrap();
        assert_eq!(reread.total_processed, 5);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_recorded_as_aborted() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let input = InputTable::from_reader("name\nok\nPANIC\nfine\n".as_bytes(), "name").unwrap();

        let summary = runner(FakeProcessor::new()).run(&mut store, &input, &options(3)).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(matches!(
            store.state().results[1].outcome,
            UnitOutcome::Failure {
                kind: FailureKind::Aborted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_records_nothing_new() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let runner = BatchRunner::new(Arc::new(FakeProcessor::new()), LookupPool::new(2), shutdown);

        let summary = runner.run(&mut store, &table(6), &options(6)).await.unwrap();
        assert_eq!(summary.skipped, 6);
        assert_eq!(store.state().last_processed_index, -1);
    }

    #[tokio::test]
    async fn test_max_total_bound() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(&dir.path().join("cp.json"), "founders").unwrap();
        let runner = runner(FakeProcessor::new());
        let mut opts = options(10);
        opts.max_total = Some(3);

        runner.run(&mut store, &table(10), &opts).await.unwrap();
        let again = runner.run(&mut store, &table(10), &opts).await.unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(store.state().total_processed, 3);
        assert_eq!(store.state().status, CheckpointStatus::InProgress);
    }

    #[test]
    fn test_unit_request_fields() {
        let input = table(1);
        let request = UnitRequest::from_row(0, &input.rows()[0], input.headers());
        assert_eq!(request.field("city"), "Austin");
        assert_eq!(request.field("missing"), "");
    }
}
