//! A worker executing a contiguous slice of test runs, one after another.

use std::ops::Range;
use std::sync::Arc;

use blobtester_service::{BackendError, Container};
use futures_util::StreamExt;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::TestConfiguration;
use crate::digest::{DigestHandle, DigestReader, DigestWriter};
use crate::payload::RandomPayload;
use crate::record::{DownloadRecord, Phase, TestRunRecord};
use crate::sink::RecordSink;

/// Chunk size used when streaming generated payloads into an upload.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// The half-open range `[offset, offset + count)` of global run indices assigned to one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkSlice {
    /// First run index of the slice.
    pub offset: u64,
    /// Number of runs in the slice.
    pub count: u64,
}

impl WorkSlice {
    /// The run indices of this slice in execution order.
    pub fn runs(&self) -> Range<u64> {
        self.offset..self.offset + self.count
    }
}

/// Why a single run produced no record.
#[derive(Debug, Error)]
pub enum RunError {
    /// The upload failed.
    #[error("upload failed: {0}")]
    Upload(#[source] BackendError),
    /// The download for verification failed.
    #[error("download failed: {0}")]
    Download(#[source] BackendError),
    /// The backend reported success without consuming the whole payload.
    #[error("backend consumed {actual} of {expected} payload bytes")]
    ShortUpload {
        /// The generated payload size.
        expected: u64,
        /// Bytes actually read by the backend.
        actual: u64,
    },
}

/// How a worker stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Every run of the slice was attempted.
    Completed,
    /// Cancellation was observed before the slice was exhausted.
    Cancelled,
}

/// What a worker did with its slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    /// Index of the worker.
    pub worker: usize,
    /// The assigned slice.
    pub slice: WorkSlice,
    /// How the worker stopped.
    pub outcome: WorkerOutcome,
    /// Runs that emitted a record.
    pub succeeded: u64,
    /// Runs that failed.
    pub failed: u64,
}

/// Executes the runs of one [`WorkSlice`] sequentially.
///
/// All mutable state, including the random generator, is owned by the worker.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    slice: WorkSlice,
    config: Arc<TestConfiguration>,
    container: Container,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
    rng: SmallRng,
}

impl Worker {
    /// Creates the worker with the given index.
    ///
    /// With a configured seed, the worker's generator is seeded with `seed + index`, so that every
    /// worker is reproducible on its own.
    pub fn new(
        index: usize,
        slice: WorkSlice,
        config: Arc<TestConfiguration>,
        container: Container,
        sink: Arc<dyn RecordSink>,
        cancel: CancellationToken,
    ) -> Self {
        let rng = match config.seed() {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => SmallRng::seed_from_u64(rand::random()),
        };

        Self {
            index,
            slice,
            config,
            container,
            sink,
            cancel,
            rng,
        }
    }

    /// Runs the whole slice unless cancelled, then reports back.
    pub async fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.index,
            slice: self.slice,
            outcome: WorkerOutcome::Completed,
            succeeded: 0,
            failed: 0,
        };
        tracing::debug!(worker = self.index, runs = ?self.slice.runs(), "worker started");

        let last_run = self.slice.runs().end.saturating_sub(1);
        for run in self.slice.runs() {
            if self.cancel.is_cancelled() {
                tracing::info!(worker = self.index, run, "worker cancelled");
                report.outcome = WorkerOutcome::Cancelled;
                break;
            }

            let blob_id = Uuid::new_v4().to_string();
            let span = tracing::info_span!("run", worker = self.index, run, blob = %blob_id);

            async {
                match self.perform_run(run, &blob_id).await {
                    Ok(record) => {
                        if record.verified() == Some(false) {
                            tracing::warn!(
                                uploaded = %record.upload_digest,
                                "downloaded contents do not match the upload"
                            );
                        }
                        self.sink.record(&record);
                        report.succeeded += 1;
                    }
                    Err(error) => {
                        tracing::error!(error = &error as &dyn std::error::Error, "run failed");
                        self.sink.failure(run, &error);
                        report.failed += 1;
                    }
                }

                // Cleanup is best effort, a leftover blob does not affect the recorded result.
                if let Err(error) = self.container.delete_if_exists(&blob_id).await {
                    tracing::debug!(
                        error = &error as &dyn std::error::Error,
                        "failed to delete blob"
                    );
                }
            }
            .instrument(span)
            .await;

            if run != last_run {
                self.pause().await;
            }
        }

        tracing::debug!(worker = self.index, outcome = ?report.outcome, "worker finished");
        report
    }

    /// Waits for the configured delay, returning early on cancellation.
    async fn pause(&self) {
        let delay = self.config.delay();
        if delay.is_zero() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Draws a payload size uniformly from the configured inclusive range.
    fn next_size(&mut self) -> u64 {
        let min = self.config.min_size().as_u64();
        let max = self.config.max_size().as_u64();
        self.rng.random_range(min..=max)
    }

    async fn perform_run(&mut self, run: u64, blob_id: &str) -> Result<TestRunRecord, RunError> {
        let size = self.next_size();
        let payload = RandomPayload::new(size, SmallRng::seed_from_u64(self.rng.next_u64()));

        let upload_digest = DigestHandle::new();
        let reader = DigestReader::new(payload, upload_digest.clone());
        let stream = ReaderStream::with_capacity(reader, UPLOAD_CHUNK_SIZE).boxed();

        let stopwatch = Phase::start();
        self.container
            .upload(blob_id, size, stream)
            .await
            .map_err(RunError::Upload)?;
        let upload = stopwatch.stop();

        let uploaded = upload_digest.bytes();
        if uploaded != size {
            return Err(RunError::ShortUpload {
                expected: size,
                actual: uploaded,
            });
        }
        let upload_digest = upload_digest.finalize();

        let download = if self.config.verify() {
            let mut sink = DigestWriter::new(tokio::io::sink());

            let stopwatch = Phase::start();
            self.container
                .download(blob_id, &mut sink)
                .await
                .map_err(RunError::Download)?;
            let phase = stopwatch.stop();

            Some(DownloadRecord {
                phase,
                digest: sink.finalize(),
            })
        } else {
            None
        };

        Ok(TestRunRecord {
            run,
            size,
            upload,
            upload_digest,
            download,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blobtester_service::InMemoryBackend;

    use super::*;
    use crate::config::ByteCount;
    use crate::sink::{CsvSink, MetricsSink};

    async fn worker(
        config: TestConfiguration,
        slice: WorkSlice,
    ) -> (Worker, InMemoryBackend, Arc<MetricsSink<CsvSink<Vec<u8>>>>) {
        let backend = InMemoryBackend::new();
        let container = Container::create_if_absent(Arc::new(backend.clone()), "blobtest")
            .await
            .unwrap();
        let sink = Arc::new(MetricsSink::new(CsvSink::new(Vec::new())));
        let worker = Worker::new(
            0,
            slice,
            Arc::new(config),
            container,
            sink.clone(),
            CancellationToken::new(),
        );
        (worker, backend, sink)
    }

    #[test]
    fn slice_runs() {
        let slice = WorkSlice {
            offset: 4,
            count: 3,
        };
        assert_eq!(slice.runs().collect::<Vec<_>>(), [4, 5, 6]);
    }

    #[tokio::test]
    async fn sizes_stay_in_range() {
        let config = TestConfiguration::builder()
            .size_range(ByteCount::b(10), ByteCount::b(20))
            .seed(Some(1))
            .build()
            .unwrap();
        let slice = WorkSlice {
            offset: 0,
            count: 1,
        };
        let (mut worker, _, _) = worker(config, slice).await;

        let mut seen = [false; 11];
        for _ in 0..2_000 {
            let size = worker.next_size();
            assert!((10..=20).contains(&size));
            seen[(size - 10) as usize] = true;
        }
        // both ends of the range are reachable
        assert!(seen.iter().all(|s| *s));
    }

    #[tokio::test]
    async fn fixed_size() {
        let config = TestConfiguration::builder()
            .size(ByteCount::b(77))
            .build()
            .unwrap();
        let slice = WorkSlice {
            offset: 0,
            count: 1,
        };
        let (mut worker, _, _) = worker(config, slice).await;

        assert!((0..100).all(|_| worker.next_size() == 77));
    }

    #[tokio::test]
    async fn runs_slice_and_cleans_up() {
        let config = TestConfiguration::builder()
            .delay(Duration::ZERO)
            .size_range(ByteCount::b(1), ByteCount::kib(64))
            .build()
            .unwrap();
        let slice = WorkSlice {
            offset: 10,
            count: 3,
        };
        let (worker, backend, sink) = worker(config, slice).await;

        let report = worker.run().await;
        assert_eq!(report.outcome, WorkerOutcome::Completed);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert!(backend.is_empty());

        let metrics = sink.take_metrics();
        assert!(metrics.is_clean());
        assert_eq!(metrics.completed_runs(), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let config = TestConfiguration::builder()
            .delay(Duration::ZERO)
            .build()
            .unwrap();
        let slice = WorkSlice {
            offset: 0,
            count: 5,
        };
        let (worker, backend, sink) = worker(config, slice).await;
        worker.cancel.cancel();

        let report = worker.run().await;
        assert_eq!(report.outcome, WorkerOutcome::Cancelled);
        assert_eq!(report.succeeded, 0);
        assert!(backend.is_empty());
        assert_eq!(sink.take_metrics().completed_runs(), 0);
    }
}
