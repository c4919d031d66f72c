//! The outcome of a single test run and its CSV rendering.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::digest::Digest;

/// Column header preceding all [`TestRunRecord`] lines.
pub const CSV_HEADER: &str = "RUN_NUMBER, UPLOAD_START_TIME, UPLOAD_END_TIME, UPLOAD_DURATION(ms), \
    DOWNLOAD_START_TIME, DOWNLOAD_END_TIME, DOWNLOAD_DURATION(ms), VERIFIED, FILE_SIZE(bytes)";

/// Placeholder for columns that do not apply to a run.
const NOT_APPLICABLE: &str = "N/A";

/// Wall clock timestamps and the monotonic duration of one phase of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phase {
    /// Wall clock time when the phase started.
    pub started_at: DateTime<Utc>,
    /// Wall clock time when the phase ended.
    pub ended_at: DateTime<Utc>,
    /// Elapsed time measured with a monotonic clock, never negative.
    pub duration: Duration,
}

impl Phase {
    /// Starts measuring a phase.
    pub fn start() -> Stopwatch {
        Stopwatch {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    /// The duration in fractional milliseconds.
    pub fn millis(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// A running measurement, see [`Phase::start`].
#[derive(Debug)]
pub struct Stopwatch {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Stopwatch {
    /// Stops the measurement.
    pub fn stop(self) -> Phase {
        Phase {
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration: self.start.elapsed(),
        }
    }
}

/// The download half of a verified run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadRecord {
    /// Timing of the download.
    pub phase: Phase,
    /// Digest of the downloaded bytes.
    pub digest: Digest,
}

/// Timing and verification outcome of one upload and optional download cycle.
///
/// A record is complete once constructed and never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestRunRecord {
    /// Global run index, unique across all workers.
    pub run: u64,
    /// Payload size in bytes.
    pub size: u64,
    /// Timing of the upload.
    pub upload: Phase,
    /// Digest of the uploaded bytes.
    pub upload_digest: Digest,
    /// The download, if verification is enabled.
    pub download: Option<DownloadRecord>,
}

impl TestRunRecord {
    /// Whether the downloaded bytes match the uploaded ones.
    ///
    /// Returns `None` if no download was performed.
    pub fn verified(&self) -> Option<bool> {
        self.download
            .as_ref()
            .map(|download| download.digest == self.upload_digest)
    }
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Renders the record as a single CSV line without a trailing newline.
impl fmt::Display for TestRunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {:.3}, ",
            self.run,
            timestamp(&self.upload.started_at),
            timestamp(&self.upload.ended_at),
            self.upload.millis(),
        )?;

        match (&self.download, self.verified()) {
            (Some(download), Some(verified)) => write!(
                f,
                "{}, {}, {:.3}, {verified}, ",
                timestamp(&download.phase.started_at),
                timestamp(&download.phase.ended_at),
                download.phase.millis(),
            )?,
            _ => {
                for _ in 0..4 {
                    write!(f, "{NOT_APPLICABLE}, ")?;
                }
            }
        }

        write!(f, "{}", self.size)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn phase(start_ms: i64, duration_ms: u64) -> Phase {
        let started_at = Utc.timestamp_millis_opt(start_ms).unwrap();
        let duration = Duration::from_millis(duration_ms);
        Phase {
            started_at,
            ended_at: started_at + chrono::TimeDelta::milliseconds(duration_ms as i64),
            duration,
        }
    }

    #[test]
    fn renders_upload_only() {
        let record = TestRunRecord {
            run: 3,
            size: 1024,
            upload: phase(1_700_000_000_000, 250),
            upload_digest: Digest::of(b"payload"),
            download: None,
        };

        assert_eq!(record.verified(), None);
        assert_eq!(
            record.to_string(),
            "3, 2023-11-14T22:13:20.000Z, 2023-11-14T22:13:20.250Z, 250.000, N/A, N/A, N/A, N/A, 1024"
        );
    }

    #[test]
    fn renders_verified_download() {
        let record = TestRunRecord {
            run: 0,
            size: 5,
            upload: phase(1_700_000_000_000, 10),
            upload_digest: Digest::of(b"payload"),
            download: Some(DownloadRecord {
                phase: phase(1_700_000_000_010, 5),
                digest: Digest::of(b"payload"),
            }),
        };

        assert_eq!(record.verified(), Some(true));
        assert_eq!(
            record.to_string(),
            "0, 2023-11-14T22:13:20.000Z, 2023-11-14T22:13:20.010Z, 10.000, \
             2023-11-14T22:13:20.010Z, 2023-11-14T22:13:20.015Z, 5.000, true, 5"
        );
    }

    #[test]
    fn mismatching_digest_is_not_verified() {
        let record = TestRunRecord {
            run: 0,
            size: 5,
            upload: phase(0, 1),
            upload_digest: Digest::of(b"payload"),
            download: Some(DownloadRecord {
                phase: phase(1, 1),
                digest: Digest::of(b"corrupt"),
            }),
        };

        assert_eq!(record.verified(), Some(false));
        assert!(record.to_string().contains(", false, "));
    }

    #[test]
    fn header_matches_column_count() {
        let columns = CSV_HEADER.split(", ").count();
        assert_eq!(columns, 9);
    }

    #[test]
    fn stopwatch_measures_non_negative_duration() {
        let phase = Phase::start().stop();
        assert!(phase.ended_at >= phase.started_at);
        assert!(phase.millis() >= 0.0);
    }
}
