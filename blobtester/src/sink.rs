//! Destinations for completed test runs.
//!
//! Workers hand every record to a shared [`RecordSink`] as soon as the run finishes, so the
//! output can be observed while the test is still in progress.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

use crate::record::{CSV_HEADER, TestRunRecord};
use crate::report::RunMetrics;
use crate::worker::RunError;

/// Receives the results of test runs from all workers concurrently.
///
/// Every call must be handled atomically, so that lines of concurrent workers never interleave.
pub trait RecordSink: fmt::Debug + Send + Sync {
    /// Called once before any worker starts.
    fn header(&self);

    /// Called for every run that completed its upload and, if enabled, its download.
    fn record(&self, record: &TestRunRecord);

    /// Called for every run that failed. No record is emitted for such runs.
    fn failure(&self, _run: u64, _error: &RunError) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Writes the CSV header and one line per record.
pub struct CsvSink<W> {
    writer: Mutex<W>,
}

impl CsvSink<io::Stdout> {
    /// Writes to the standard output of the process.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> CsvSink<W> {
    /// Writes to `writer`, flushing after every line.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line(&self, line: fmt::Arguments<'_>) {
        let mut writer = lock(&self.writer);
        let result = writer
            .write_fmt(format_args!("{line}\n"))
            .and_then(|()| writer.flush());

        if let Err(error) = result {
            tracing::warn!(%error, "failed to write result line");
        }
    }
}

impl<W> fmt::Debug for CsvSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvSink").finish_non_exhaustive()
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn header(&self) {
        self.write_line(format_args!("{CSV_HEADER}"));
    }

    fn record(&self, record: &TestRunRecord) {
        self.write_line(format_args!("{record}"));
    }
}

/// Forwards to an inner sink while accumulating [`RunMetrics`].
#[derive(Debug)]
pub struct MetricsSink<S> {
    inner: S,
    metrics: Mutex<RunMetrics>,
}

impl<S: RecordSink> MetricsSink<S> {
    /// Wraps `inner` with empty metrics.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            metrics: Mutex::new(RunMetrics::default()),
        }
    }

    /// Returns the metrics collected so far and resets them.
    pub fn take_metrics(&self) -> RunMetrics {
        std::mem::take(&mut *lock(&self.metrics))
    }
}

impl<S: RecordSink> RecordSink for MetricsSink<S> {
    fn header(&self) {
        self.inner.header();
    }

    fn record(&self, record: &TestRunRecord) {
        lock(&self.metrics).add_record(record);
        self.inner.record(record);
    }

    fn failure(&self, run: u64, error: &RunError) {
        lock(&self.metrics).add_failure();
        self.inner.failure(run, error);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::digest::Digest;
    use crate::record::Phase;

    fn record(run: u64) -> TestRunRecord {
        let now = Utc::now();
        TestRunRecord {
            run,
            size: 42,
            upload: Phase {
                started_at: now,
                ended_at: now,
                duration: Duration::from_millis(3),
            },
            upload_digest: Digest::of(b"x"),
            download: None,
        }
    }

    #[test]
    fn csv_lines() {
        let sink = CsvSink::new(Vec::new());
        sink.header();
        sink.record(&record(0));
        sink.record(&record(1));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("0, "));
        assert!(lines[2].starts_with("1, "));
        assert!(lines[2].ends_with(", 42"));
    }

    #[test]
    fn failures_are_counted_but_not_written() {
        let sink = MetricsSink::new(CsvSink::new(Vec::new()));
        sink.record(&record(0));
        sink.failure(
            1,
            &RunError::ShortUpload {
                expected: 42,
                actual: 0,
            },
        );

        let metrics = sink.take_metrics();
        assert_eq!(metrics.completed_runs(), 1);
        assert_eq!(metrics.failed_runs, 1);

        let output = String::from_utf8(sink.inner.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 1);
    }
}
