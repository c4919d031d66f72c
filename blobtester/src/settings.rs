//! Settings of the `blobtester` binary.
//!
//! Settings are loaded from the following sources, each overriding the previous one:
//!
//! 1. Defaults
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables (prefixed with `BLOBTESTER__`)
//! 4. Command line flags
//!
//! # Environment Variables
//!
//! Environment variables use `BLOBTESTER__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `BLOBTESTER__COUNT=100` sets the number of test runs
//! - `BLOBTESTER__STORAGE__TYPE=filesystem` selects the filesystem backend
//! - `BLOBTESTER__STORAGE__PATH=/data` sets its directory
//!
//! # YAML Configuration File
//!
//! ```yaml
//! count: 100
//! thread_count: 4
//! file_size_min: 1K
//! file_size_max: 4M
//!
//! storage:
//!   type: azure
//!   account_name: devstoreaccount1
//!   access_key: ...
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use blobtester_service::{AzureCredentials, StorageConfig};
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::config::{ByteCount, ConfigError, TestConfiguration};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "BLOBTESTER__";

/// Container used when none is configured.
const DEFAULT_CONTAINER: &str = "blobtest";

/// Newtype around `String` that protects against accidental logging of secrets. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// The secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Storage backend configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// An Azure Blob Storage account (type `"azure"`).
    Azure {
        /// Name of the storage account. Required.
        ///
        /// `BLOBTESTER__STORAGE__ACCOUNT_NAME`
        account_name: Option<String>,

        /// Base64-encoded access key of the account. Required.
        ///
        /// `BLOBTESTER__STORAGE__ACCESS_KEY`
        access_key: Option<SecretBox<ConfigSecret>>,

        /// Whether to connect with `https`. Defaults to `true`.
        ///
        /// `BLOBTESTER__STORAGE__USE_HTTPS`
        #[serde(default = "default_true")]
        use_https: bool,

        /// Custom endpoint, for instance of a storage emulator.
        ///
        /// `BLOBTESTER__STORAGE__ENDPOINT`
        endpoint: Option<String>,
    },

    /// Files below a local directory (type `"filesystem"`).
    FileSystem {
        /// Directory holding one subdirectory per container.
        ///
        /// `BLOBTESTER__STORAGE__PATH`
        path: PathBuf,
    },

    /// Process memory (type `"memory"`), useful to measure the tool's own overhead.
    Memory {},
}

fn default_true() -> bool {
    true
}

impl Default for Storage {
    fn default() -> Self {
        Storage::Azure {
            account_name: None,
            access_key: None,
            use_https: true,
            endpoint: None,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug, Error)]
#[error(r#"error parsing "{0}" as format: expected one of "auto", "pretty", "simplified", "json""#)]
pub struct FormatParseError(String);

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr, stdout only carries results.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level, overridden by `RUST_LOG`. Defaults to `INFO`.
    ///
    /// `BLOBTESTER__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. Defaults to [`LogFormat::Auto`].
    ///
    /// `BLOBTESTER__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Errors turning [`Config`] into the inputs of a test.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A setting required by the selected storage backend is not set.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    /// The test parameters are invalid.
    #[error(transparent)]
    Test(#[from] ConfigError),
}

/// Main configuration of the `blobtester` binary.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Total number of test runs. Defaults to `1`.
    pub count: u64,

    /// Pause between two runs of one worker in milliseconds. Defaults to `30000`.
    pub delay: u64,

    /// Number of concurrent workers. Defaults to `1`.
    pub thread_count: usize,

    /// Smallest payload size, for example `512K`. Defaults to `1K`.
    pub file_size_min: ByteCount,

    /// Largest payload size, for example `4M`. Defaults to `1K`.
    pub file_size_max: ByteCount,

    /// Download and compare every upload. Defaults to `true`.
    pub verify: bool,

    /// Seed for reproducible payload sizes and contents.
    pub seed: Option<u64>,

    /// Container holding the test blobs, created if absent. Defaults to `blobtest`.
    pub container_name: String,

    /// The storage backend under test. See [`Storage`].
    pub storage: Storage,

    /// Logging configuration. See [`Logging`].
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            count: 1,
            delay: 30_000,
            thread_count: 1,
            file_size_min: ByteCount::kib(1),
            file_size_max: ByteCount::kib(1),
            verify: true,
            seed: None,
            container_name: DEFAULT_CONTAINER.to_owned(),
            storage: Storage::default(),
            logging: Logging::default(),
        }
    }
}

/// Values set on the command line, taking precedence over all other sources.
///
/// Unset fields leave the loaded configuration untouched.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// See [`Config::count`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// See [`Config::delay`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// See [`Config::thread_count`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<usize>,
    /// See [`Config::file_size_min`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_min: Option<ByteCount>,
    /// See [`Config::file_size_max`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_max: Option<ByteCount>,
    /// See [`Config::verify`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    /// See [`Config::seed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// See [`Config::container_name`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Nested storage settings.
    pub storage: StorageOverrides,
}

/// Command line values for the nested [`Storage`] settings.
#[derive(Debug, Default, Serialize)]
pub struct StorageOverrides {
    /// The backend type, `azure`, `filesystem` or `memory`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Azure account name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    /// Azure access key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<SecretBox<ConfigSecret>>,
    /// Whether Azure is reached over `https`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_https: Option<bool>,
    /// Custom Azure endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Filesystem backend directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `path`)
    /// 3. Environment variables (prefixed with `BLOBTESTER__`)
    /// 4. Command line `overrides`
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }

    /// Validates the test parameters.
    pub fn test_configuration(&self) -> Result<TestConfiguration, SettingsError> {
        let config = TestConfiguration::builder()
            .run_count(self.count)
            .delay(Duration::from_millis(self.delay))
            .thread_count(self.thread_count)
            .size_range(self.file_size_min, self.file_size_max)
            .verify(self.verify)
            .seed(self.seed)
            .build()?;

        Ok(config)
    }

    /// Returns the backend configuration, checking that all required settings are present.
    pub fn storage_config(&self) -> Result<StorageConfig, SettingsError> {
        Ok(match &self.storage {
            Storage::Azure {
                account_name,
                access_key,
                use_https,
                endpoint,
            } => {
                let account_name = account_name
                    .as_deref()
                    .filter(|name| !name.is_empty())
                    .ok_or(SettingsError::Missing("account_name"))?;
                let access_key = access_key
                    .as_ref()
                    .map(|key| key.expose_secret().as_str())
                    .filter(|key| !key.is_empty())
                    .ok_or(SettingsError::Missing("access_key"))?;

                StorageConfig::Azure {
                    credentials: AzureCredentials::new(account_name, access_key),
                    use_https: *use_https,
                    endpoint: endpoint.clone(),
                }
            }
            Storage::FileSystem { path } => StorageConfig::FileSystem { path: path.clone() },
            Storage::Memory {} => StorageConfig::InMemory,
        })
    }

    /// Logs the effective settings, without secrets.
    pub fn log_settings(&self) {
        let (backend, account, use_https) = match &self.storage {
            Storage::Azure {
                account_name,
                use_https,
                ..
            } => {
                let account = account_name.as_deref().unwrap_or_default();
                ("azure", account, *use_https)
            }
            Storage::FileSystem { .. } => ("filesystem", "", false),
            Storage::Memory {} => ("memory", "", false),
        };

        tracing::info!(
            backend,
            account,
            container = %self.container_name,
            count = self.count,
            delay_ms = self.delay,
            file_size_min = %self.file_size_min,
            file_size_max = %self.file_size_max,
            use_https,
            verify = self.verify,
            threads = self.thread_count,
            "test settings"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None, &Overrides::default()).unwrap();

            assert_eq!(config.count, 1);
            assert_eq!(config.delay, 30_000);
            assert_eq!(config.thread_count, 1);
            assert_eq!(config.file_size_min, ByteCount::kib(1));
            assert_eq!(config.file_size_max, ByteCount::kib(1));
            assert!(config.verify);
            assert_eq!(config.container_name, "blobtest");

            let Storage::Azure { use_https, .. } = config.storage else {
                panic!("expected azure storage");
            };
            assert!(use_https);

            Ok(())
        });
    }

    #[test]
    fn azure_requires_credentials() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBTESTER__STORAGE__ACCOUNT_NAME", "devstoreaccount1");

            let config = Config::load(None, &Overrides::default()).unwrap();
            let err = config.storage_config().unwrap_err();
            assert!(matches!(err, SettingsError::Missing("access_key")));

            Ok(())
        });
    }

    #[test]
    fn configure_azure_with_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBTESTER__STORAGE__ACCOUNT_NAME", "devstoreaccount1");
            jail.set_env("BLOBTESTER__STORAGE__ACCESS_KEY", "c2VjcmV0");
            jail.set_env("BLOBTESTER__STORAGE__USE_HTTPS", "false");
            jail.set_env("BLOBTESTER__COUNT", "12");
            jail.set_env("BLOBTESTER__FILE_SIZE_MAX", "4M");

            let config = Config::load(None, &Overrides::default()).unwrap();
            assert_eq!(config.count, 12);
            assert_eq!(config.file_size_max, ByteCount::b(4 * 1024 * 1024));

            let StorageConfig::Azure {
                credentials,
                use_https,
                endpoint,
            } = config.storage_config().unwrap()
            else {
                panic!("expected azure storage");
            };
            assert_eq!(credentials.account_name(), "devstoreaccount1");
            assert!(!use_https);
            assert_eq!(endpoint, None);

            // the key never shows up in debug output
            assert!(!format!("{config:?}").contains("c2VjcmV0"));

            Ok(())
        });
    }

    #[test]
    fn configure_filesystem_with_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            count: 8
            thread_count: 4
            delay: 0
            file_size_min: 1K
            file_size_max: 2K
            verify: false
            storage:
              type: filesystem
              path: /tmp/blobs
            logging:
              level: debug
              format: json
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path()), &Overrides::default()).unwrap();
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            let test = config.test_configuration().unwrap();
            assert_eq!(test.run_count(), 8);
            assert_eq!(test.thread_count(), 4);
            assert_eq!(test.delay(), Duration::ZERO);
            assert_eq!(test.min_size(), ByteCount::kib(1));
            assert_eq!(test.max_size(), ByteCount::kib(2));
            assert!(!test.verify());

            let StorageConfig::FileSystem { path } = config.storage_config().unwrap() else {
                panic!("expected filesystem storage");
            };
            assert_eq!(path, Path::new("/tmp/blobs"));

            Ok(())
        });
    }

    #[test]
    fn overrides_take_precedence() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            count: 8
            container_name: from-file
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBTESTER__COUNT", "9");
            jail.set_env("BLOBTESTER__THREAD_COUNT", "3");

            let overrides = Overrides {
                count: Some(10),
                storage: StorageOverrides {
                    kind: Some("memory".into()),
                    ..Default::default()
                },
                ..Default::default()
            };
            let config = Config::load(Some(tempfile.path()), &overrides).unwrap();

            assert_eq!(config.count, 10);
            assert_eq!(config.thread_count, 3);
            assert_eq!(config.container_name, "from-file");
            assert!(matches!(config.storage, Storage::Memory {}));
            assert!(matches!(
                config.storage_config().unwrap(),
                StorageConfig::InMemory
            ));

            Ok(())
        });
    }

    #[test]
    fn rejects_inverted_size_range() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBTESTER__FILE_SIZE_MIN", "2K");
            jail.set_env("BLOBTESTER__FILE_SIZE_MAX", "1K");

            let config = Config::load(None, &Overrides::default()).unwrap();
            let err = config.test_configuration().unwrap_err();
            assert!(matches!(
                err,
                SettingsError::Test(ConfigError::SizeRange { .. })
            ));

            Ok(())
        });
    }

    #[test]
    fn rejects_unsuffixed_size() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BLOBTESTER__FILE_SIZE_MIN", "1024");

            assert!(Config::load(None, &Overrides::default()).is_err());

            Ok(())
        });
    }
}
