//! The immutable configuration of a test, shared by all workers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Upper bound for the number of concurrent workers.
pub const MAX_THREAD_COUNT: usize = 4096;

/// A number of bytes written as `<number><G|M|K|B>`.
///
/// Suffixes are powers of 1024 and case-insensitive; `B` multiplies by one. A number without a
/// suffix is rejected, so `"10K"` parses as 10240 but `"10240"` does not parse at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ByteCount(u64);

impl ByteCount {
    /// Creates a byte count from a plain number of bytes.
    pub const fn b(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Creates a byte count of `kib` kibibytes.
    pub const fn kib(kib: u64) -> Self {
        Self(kib * KIB)
    }

    /// The number of bytes.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Error parsing a [`ByteCount`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseByteCountError {
    /// The input was empty.
    #[error("byte size is empty")]
    Empty,
    /// The input does not end in one of the known suffixes.
    #[error("byte size `{0}` must end with [G|M|K|B]")]
    MissingSuffix(String),
    /// The part before the suffix is not a non-negative integer.
    #[error("could not parse byte size `{0}`")]
    InvalidNumber(String),
    /// The value does not fit into 64 bits.
    #[error("byte size `{0}` is too large")]
    Overflow(String),
}

impl FromStr for ByteCount {
    type Err = ParseByteCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(suffix) = s.chars().last() else {
            return Err(ParseByteCountError::Empty);
        };

        let multiplier = match suffix.to_ascii_uppercase() {
            'G' => GIB,
            'M' => MIB,
            'K' => KIB,
            'B' => 1,
            _ => return Err(ParseByteCountError::MissingSuffix(s.to_owned())),
        };

        let number = &s[..s.len() - suffix.len_utf8()];
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseByteCountError::InvalidNumber(s.to_owned()));
        }
        let number: u64 = number
            .parse()
            .map_err(|_| ParseByteCountError::Overflow(s.to_owned()))?;

        number
            .checked_mul(multiplier)
            .map(ByteCount)
            .ok_or_else(|| ParseByteCountError::Overflow(s.to_owned()))
    }
}

impl fmt::Display for ByteCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        for (unit, suffix) in [(GIB, 'G'), (MIB, 'M'), (KIB, 'K')] {
            if bytes != 0 && bytes % unit == 0 {
                return write!(f, "{}{suffix}", bytes / unit);
            }
        }
        write!(f, "{bytes}B")
    }
}

impl Serialize for ByteCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteCount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors validating a [`TestConfiguration`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one test run is required.
    #[error("run count must be at least 1")]
    ZeroRunCount,
    /// At least one worker is required.
    #[error("thread count must be at least 1")]
    ZeroThreadCount,
    /// More workers than [`MAX_THREAD_COUNT`] were requested.
    #[error("thread count must not exceed {MAX_THREAD_COUNT}, got {0}")]
    TooManyThreads(usize),
    /// Payload sizes must be at least one byte.
    #[error("payload sizes must be at least 1 byte")]
    ZeroSize,
    /// The maximum payload size is below the minimum.
    #[error("maximum payload size must not be less than the minimum ({min}, {max})")]
    SizeRange {
        /// The configured minimum.
        min: ByteCount,
        /// The configured maximum.
        max: ByteCount,
    },
}

/// Parameters of a test, validated on construction and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestConfiguration {
    run_count: u64,
    delay: Duration,
    thread_count: usize,
    min_size: ByteCount,
    max_size: ByteCount,
    verify: bool,
    seed: Option<u64>,
}

impl TestConfiguration {
    /// Returns a builder initialized with the defaults.
    pub fn builder() -> TestConfigurationBuilder {
        TestConfigurationBuilder {
            config: TestConfiguration {
                run_count: 1,
                delay: Duration::from_millis(30_000),
                thread_count: 1,
                min_size: ByteCount::kib(1),
                max_size: ByteCount::kib(1),
                verify: true,
                seed: None,
            },
        }
    }

    /// Total number of test runs across all workers.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Pause between two consecutive runs of one worker.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of concurrent workers.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Smallest payload size, inclusive.
    pub fn min_size(&self) -> ByteCount {
        self.min_size
    }

    /// Largest payload size, inclusive.
    pub fn max_size(&self) -> ByteCount {
        self.max_size
    }

    /// Whether every upload is downloaded again and compared.
    pub fn verify(&self) -> bool {
        self.verify
    }

    /// Base seed for the per-worker random generators, if runs should be reproducible.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

/// A builder for a [`TestConfiguration`].
#[derive(Debug)]
pub struct TestConfigurationBuilder {
    config: TestConfiguration,
}

impl TestConfigurationBuilder {
    /// Total number of test runs.
    pub fn run_count(mut self, run_count: u64) -> Self {
        self.config.run_count = run_count;
        self
    }

    /// Pause between two consecutive runs of one worker.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Number of concurrent workers.
    pub fn thread_count(mut self, thread_count: usize) -> Self {
        self.config.thread_count = thread_count;
        self
    }

    /// Sets minimum and maximum payload size to the same value.
    pub fn size(self, size: ByteCount) -> Self {
        self.size_range(size, size)
    }

    /// Range of payload sizes, both ends inclusive.
    pub fn size_range(mut self, min: ByteCount, max: ByteCount) -> Self {
        self.config.min_size = min;
        self.config.max_size = max;
        self
    }

    /// Whether uploads are downloaded and verified.
    pub fn verify(mut self, verify: bool) -> Self {
        self.config.verify = verify;
        self
    }

    /// Seeds the per-worker random generators.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.config.seed = seed;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<TestConfiguration, ConfigError> {
        let config = self.config;

        if config.run_count == 0 {
            return Err(ConfigError::ZeroRunCount);
        }
        if config.thread_count == 0 {
            return Err(ConfigError::ZeroThreadCount);
        }
        if config.thread_count > MAX_THREAD_COUNT {
            return Err(ConfigError::TooManyThreads(config.thread_count));
        }
        if config.min_size.as_u64() == 0 || config.max_size.as_u64() == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if config.max_size < config.min_size {
            return Err(ConfigError::SizeRange {
                min: config.min_size,
                max: config.max_size,
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixes() {
        assert_eq!("10K".parse(), Ok(ByteCount::b(10240)));
        assert_eq!("2M".parse(), Ok(ByteCount::b(2_097_152)));
        assert_eq!("1G".parse(), Ok(ByteCount::b(1_073_741_824)));
        assert_eq!("5B".parse(), Ok(ByteCount::b(5)));
        assert_eq!("3k".parse(), Ok(ByteCount::b(3072)));
        assert_eq!(" 7b ".parse(), Ok(ByteCount::b(7)));
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert_eq!(
            "1024".parse::<ByteCount>(),
            Err(ParseByteCountError::MissingSuffix("1024".into()))
        );
        assert_eq!(
            "10T".parse::<ByteCount>(),
            Err(ParseByteCountError::MissingSuffix("10T".into()))
        );
        assert_eq!("".parse::<ByteCount>(), Err(ParseByteCountError::Empty));
        assert_eq!(
            "K".parse::<ByteCount>(),
            Err(ParseByteCountError::InvalidNumber("K".into()))
        );
        assert_eq!(
            "-1K".parse::<ByteCount>(),
            Err(ParseByteCountError::InvalidNumber("-1K".into()))
        );
        assert_eq!(
            "1.5M".parse::<ByteCount>(),
            Err(ParseByteCountError::InvalidNumber("1.5M".into()))
        );
        assert_eq!(
            "99999999999999999999G".parse::<ByteCount>(),
            Err(ParseByteCountError::Overflow("99999999999999999999G".into()))
        );
        assert_eq!(
            "17179869184G".parse::<ByteCount>(),
            Err(ParseByteCountError::Overflow("17179869184G".into()))
        );
    }

    #[test]
    fn displays_compact_suffix() {
        assert_eq!(ByteCount::b(10240).to_string(), "10K");
        assert_eq!(ByteCount::b(2_097_152).to_string(), "2M");
        assert_eq!(ByteCount::b(1_073_741_824).to_string(), "1G");
        assert_eq!(ByteCount::b(1000).to_string(), "1000B");
        assert_eq!(ByteCount::b(0).to_string(), "0B");

        let size = ByteCount::b(1536);
        assert_eq!(size.to_string().parse(), Ok(size));
    }

    #[test]
    fn defaults() {
        let config = TestConfiguration::builder().build().unwrap();
        assert_eq!(config.run_count(), 1);
        assert_eq!(config.delay(), Duration::from_secs(30));
        assert_eq!(config.thread_count(), 1);
        assert_eq!(config.min_size(), ByteCount::b(1024));
        assert_eq!(config.max_size(), ByteCount::b(1024));
        assert!(config.verify());
        assert_eq!(config.seed(), None);
    }

    #[test]
    fn rejects_inverted_size_range() {
        let err = TestConfiguration::builder()
            .size_range(ByteCount::kib(2), ByteCount::kib(1))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::SizeRange {
                min: ByteCount::kib(2),
                max: ByteCount::kib(1),
            }
        );
    }

    #[test]
    fn rejects_zero_counts() {
        let err = TestConfiguration::builder().run_count(0).build();
        assert_eq!(err, Err(ConfigError::ZeroRunCount));

        let err = TestConfiguration::builder().thread_count(0).build();
        assert_eq!(err, Err(ConfigError::ZeroThreadCount));

        let err = TestConfiguration::builder().thread_count(5000).build();
        assert_eq!(err, Err(ConfigError::TooManyThreads(5000)));

        let err = TestConfiguration::builder().size(ByteCount::b(0)).build();
        assert_eq!(err, Err(ConfigError::ZeroSize));
    }
}
