//! Aggregated timing statistics, printed once all workers have finished.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::record::TestRunRecord;

/// Statistics over all runs reported to a [`MetricsSink`](crate::sink::MetricsSink).
#[derive(Default)]
pub struct RunMetrics {
    /// Distribution of payload sizes in bytes.
    pub file_sizes: DDSketch,

    /// Total bytes uploaded by completed runs.
    pub bytes_uploaded: u64,
    /// Total bytes downloaded by completed runs.
    pub bytes_downloaded: u64,

    /// Upload durations in seconds.
    pub upload_timing: DDSketch,
    /// Download durations in seconds.
    pub download_timing: DDSketch,

    /// Runs that failed and produced no record.
    pub failed_runs: u64,
    /// Runs whose downloaded digest did not match the upload.
    pub mismatches: u64,
}

impl RunMetrics {
    /// Adds a completed run.
    pub fn add_record(&mut self, record: &TestRunRecord) {
        self.file_sizes.add(record.size as f64);
        self.bytes_uploaded += record.size;
        self.upload_timing.add(record.upload.duration.as_secs_f64());

        if let Some(download) = &record.download {
            self.bytes_downloaded += record.size;
            self.download_timing.add(download.phase.duration.as_secs_f64());
        }
        if record.verified() == Some(false) {
            self.mismatches += 1;
        }
    }

    /// Adds a failed run.
    pub fn add_failure(&mut self) {
        self.failed_runs += 1;
    }

    /// Number of runs that produced a record.
    pub fn completed_runs(&self) -> usize {
        self.upload_timing.count()
    }

    /// Returns `true` if no run failed and every verification succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed_runs == 0 && self.mismatches == 0
    }

    /// Prints a summary to stderr, computing rates over `elapsed`.
    pub fn print_summary(&self, elapsed: Duration) {
        eprintln!();
        eprint!(
            "{} ({} runs",
            "## SUMMARY".bold(),
            self.completed_runs().bold()
        );
        if self.failed_runs > 0 {
            let failed = format!("{} FAILED", self.failed_runs);
            eprint!(", {}", failed.bold().red());
        }
        if self.mismatches > 0 {
            let mismatched = format!("{} MISMATCHED", self.mismatches);
            eprint!(", {}", mismatched.bold().red());
        }
        eprintln!(", {elapsed:.2?})");

        let sizes = &self.file_sizes;
        if sizes.count() > 0 {
            let mean = sizes.sum().unwrap_or_default() / sizes.count() as f64;
            let avg = ByteSize::b(mean as u64);
            let p50 = ByteSize::b(quantile(sizes, 0.5) as u64);
            let p99 = ByteSize::b(quantile(sizes, 0.99) as u64);
            eprintln!("  size avg: {}; p50: {p50}; p99: {p99}", avg.bold());
        }

        if self.upload_timing.count() > 0 {
            eprintln!("{}", "UPLOAD:".bold().green());
            print_ops(&self.upload_timing, elapsed);
            print_throughput(self.bytes_uploaded, elapsed);
            print_percentiles(&self.upload_timing, Duration::from_secs_f64);
        }
        if self.download_timing.count() > 0 {
            eprintln!("{}", "DOWNLOAD:".bold().green());
            print_ops(&self.download_timing, elapsed);
            print_throughput(self.bytes_downloaded, elapsed);
            print_percentiles(&self.download_timing, Duration::from_secs_f64);
        }
    }
}

impl fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunMetrics")
            .field("completed_runs", &self.completed_runs())
            .field("bytes_uploaded", &self.bytes_uploaded)
            .field("bytes_downloaded", &self.bytes_downloaded)
            .field("failed_runs", &self.failed_runs)
            .field("mismatches", &self.mismatches)
            .finish_non_exhaustive()
    }
}

fn quantile(sketch: &DDSketch, q: f64) -> f64 {
    sketch.quantile(q).ok().flatten().unwrap_or_default()
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let ops = sketch.count();
    let avg = map(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = map(quantile(sketch, 0.5));
    let p90 = map(quantile(sketch, 0.9));
    let p99 = map(quantile(sketch, 0.99));
    eprintln!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(sketch: &DDSketch, duration: Duration) {
    let ops = sketch.count();
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    eprint!("  {:.2} runs/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64().max(f64::EPSILON)) as u64;
    eprintln!(", {}/s", ByteSize::b(throughput).bold());
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::digest::Digest;
    use crate::record::{DownloadRecord, Phase};

    fn phase(millis: u64) -> Phase {
        let now = Utc::now();
        Phase {
            started_at: now,
            ended_at: now,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn accumulates_records() {
        let mut metrics = RunMetrics::default();
        metrics.add_record(&TestRunRecord {
            run: 0,
            size: 100,
            upload: phase(10),
            upload_digest: Digest::of(b"a"),
            download: Some(DownloadRecord {
                phase: phase(5),
                digest: Digest::of(b"a"),
            }),
        });
        metrics.add_record(&TestRunRecord {
            run: 1,
            size: 50,
            upload: phase(20),
            upload_digest: Digest::of(b"a"),
            download: Some(DownloadRecord {
                phase: phase(5),
                digest: Digest::of(b"b"),
            }),
        });
        metrics.add_failure();

        assert_eq!(metrics.completed_runs(), 2);
        assert_eq!(metrics.bytes_uploaded, 150);
        assert_eq!(metrics.bytes_downloaded, 150);
        assert_eq!(metrics.failed_runs, 1);
        assert_eq!(metrics.mismatches, 1);
        assert!(!metrics.is_clean());

        // printing must not panic, even for partially filled metrics
        metrics.print_summary(Duration::from_secs(1));
        RunMetrics::default().print_summary(Duration::ZERO);
    }
}
