//! Partitions a test across workers, runs them concurrently and waits for all of them.

use std::sync::Arc;

use blobtester_service::Container;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::TestConfiguration;
use crate::sink::RecordSink;
use crate::worker::{WorkSlice, Worker, WorkerOutcome, WorkerReport};

/// Splits `run_count` runs into `thread_count` equally sized, contiguous slices.
///
/// Every slice holds `run_count / thread_count` runs. The remaining `run_count % thread_count`
/// runs are not assigned to any worker.
pub fn partition(run_count: u64, thread_count: usize) -> Vec<WorkSlice> {
    let threads = thread_count as u64;
    if threads == 0 {
        return Vec::new();
    }

    let per_worker = run_count / threads;
    let dropped = run_count % threads;
    if dropped > 0 {
        tracing::warn!(
            run_count,
            thread_count,
            dropped,
            "run count is not a multiple of the thread count, skipping the remainder"
        );
    }

    (0..threads)
        .map(|k| WorkSlice {
            offset: k * per_worker,
            count: per_worker,
        })
        .collect()
}

/// The result of a whole test, one report per worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Reports of all workers that returned normally, ordered by worker index.
    pub reports: Vec<WorkerReport>,
    /// Number of workers that panicked.
    pub panicked: usize,
}

impl RunSummary {
    /// Number of runs that emitted a record.
    pub fn succeeded(&self) -> u64 {
        self.reports.iter().map(|r| r.succeeded).sum()
    }

    /// Number of runs that failed.
    pub fn failed(&self) -> u64 {
        self.reports.iter().map(|r| r.failed).sum()
    }

    /// Returns `true` if any worker stopped because of cancellation.
    pub fn cancelled(&self) -> bool {
        self.reports
            .iter()
            .any(|r| r.outcome == WorkerOutcome::Cancelled)
    }
}

/// Launches one [`Worker`] per slice and blocks until every worker has finished.
#[derive(Debug)]
pub struct Coordinator {
    config: Arc<TestConfiguration>,
    container: Container,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator writing all records into `sink`.
    pub fn new(config: TestConfiguration, container: Container, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            config: Arc::new(config),
            container,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// The token that stops all workers at their next run boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the test to completion or cancellation.
    ///
    /// The header is emitted before any worker starts. Each worker holds one permit of a shared
    /// semaphore and releases it when it exits, whether it completes, is cancelled or panics.
    /// The coordinator returns once all permits are back.
    pub async fn run(&self) -> RunSummary {
        let slices = partition(self.config.run_count(), self.config.thread_count());
        self.sink.header();

        let workers = slices.len();
        let barrier = Arc::new(Semaphore::new(workers));

        let mut tasks = Vec::with_capacity(workers);
        for (index, slice) in slices.into_iter().enumerate() {
            let Ok(permit) = barrier.clone().try_acquire_owned() else {
                unreachable!("one permit per worker");
            };

            let worker = Worker::new(
                index,
                slice,
                self.config.clone(),
                self.container.clone(),
                self.sink.clone(),
                self.cancel.clone(),
            );
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                worker.run().await
            }));
        }
        tracing::info!(workers, "all workers started");

        // Worker counts are bounded by `MAX_THREAD_COUNT`, so they fit into `u32`.
        if let Err(error) = barrier.acquire_many(workers as u32).await {
            tracing::error!(%error, "completion barrier closed");
        }

        let mut summary = RunSummary::default();
        for task in tasks {
            match task.await {
                Ok(report) => summary.reports.push(report),
                Err(error) => {
                    tracing::error!(error = &error as &dyn std::error::Error, "worker panicked");
                    summary.panicked += 1;
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "all workers finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_evenly() {
        let slices = partition(4, 2);
        assert_eq!(
            slices,
            [
                WorkSlice {
                    offset: 0,
                    count: 2
                },
                WorkSlice {
                    offset: 2,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn drops_remainder() {
        let slices = partition(10, 3);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices.iter().map(|s| s.count).sum::<u64>(), 9);

        let runs: Vec<_> = slices.iter().flat_map(|s| s.runs()).collect();
        assert_eq!(runs, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn more_threads_than_runs() {
        let slices = partition(2, 3);
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.count == 0));
    }

    #[test]
    fn slices_are_disjoint() {
        for (runs, threads) in [(1, 1), (7, 7), (100, 8), (1000, 13)] {
            let slices = partition(runs, threads);
            let covered = runs - runs % threads as u64;

            let mut all: Vec<_> = slices.iter().flat_map(|s| s.runs()).collect();
            assert!(all.windows(2).all(|w| w[0] < w[1]));
            all.dedup();
            assert_eq!(all.len() as u64, covered);
        }
    }

    #[test]
    fn summary_totals() {
        let report = |worker, outcome, succeeded, failed| WorkerReport {
            worker,
            slice: WorkSlice {
                offset: 0,
                count: 0,
            },
            outcome,
            succeeded,
            failed,
        };
        let summary = RunSummary {
            reports: vec![
                report(0, WorkerOutcome::Completed, 3, 1),
                report(1, WorkerOutcome::Cancelled, 1, 0),
            ],
            panicked: 0,
        };

        assert_eq!(summary.succeeded(), 4);
        assert_eq!(summary.failed(), 1);
        assert!(summary.cancelled());
    }
}
