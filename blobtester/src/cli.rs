//! Command line entry point of the `blobtester` binary.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use argh::FromArgs;
use blobtester_service::Container;
use secrecy::SecretBox;

use crate::config::ByteCount;
use crate::coordinator::Coordinator;
use crate::observability;
use crate::settings::{Config, ConfigSecret, Overrides, StorageOverrides};
use crate::sink::{CsvSink, MetricsSink};

/// Uploads random blobs to a storage service, verifies them and reports timings as CSV.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// total number of test runs
    #[argh(option)]
    count: Option<u64>,

    /// pause between two runs of a worker, in milliseconds
    #[argh(option)]
    delay: Option<u64>,

    /// number of concurrent workers
    #[argh(option)]
    thread_count: Option<usize>,

    /// fixed payload size, e.g. 512K; sets both the minimum and maximum
    #[argh(option)]
    file_size: Option<ByteCount>,

    /// smallest payload size, e.g. 1K
    #[argh(option)]
    file_size_min: Option<ByteCount>,

    /// largest payload size, e.g. 4M
    #[argh(option)]
    file_size_max: Option<ByteCount>,

    /// download and compare every upload (true or false)
    #[argh(option)]
    verify: Option<bool>,

    /// storage backend: azure, filesystem or memory
    #[argh(option)]
    storage: Option<String>,

    /// azure storage account name
    #[argh(option)]
    account_name: Option<String>,

    /// azure storage account access key
    #[argh(option)]
    access_key: Option<String>,

    /// container for the test blobs, created if absent
    #[argh(option)]
    container_name: Option<String>,

    /// connect to azure over https (true or false)
    #[argh(option)]
    use_https: Option<bool>,

    /// custom azure endpoint, e.g. of a storage emulator
    #[argh(option)]
    endpoint: Option<String>,

    /// directory of the filesystem backend
    #[argh(option)]
    path: Option<PathBuf>,

    /// seed for reproducible payloads
    #[argh(option)]
    seed: Option<u64>,
}

impl Args {
    fn overrides(self) -> Overrides {
        Overrides {
            count: self.count,
            delay: self.delay,
            thread_count: self.thread_count,
            file_size_min: self.file_size_min.or(self.file_size),
            file_size_max: self.file_size_max.or(self.file_size),
            verify: self.verify,
            seed: self.seed,
            container_name: self.container_name,
            storage: StorageOverrides {
                kind: self.storage,
                account_name: self.account_name,
                access_key: self
                    .access_key
                    .map(|key| SecretBox::new(Box::new(ConfigSecret::from(key.as_str())))),
                use_https: self.use_https,
                endpoint: self.endpoint,
                path: self.path,
            },
        }
    }
}

/// Loads the configuration, runs the test and returns the exit code of the process.
///
/// The process fails if the configuration is invalid, if any run failed, if any download did not
/// match its upload, or if a worker panicked.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();
    let config_path = args.config.clone();
    let config = Config::load(config_path.as_deref(), &args.overrides())?;

    if !std::io::stderr().is_terminal() {
        yansi::disable();
    }
    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    let test = config
        .test_configuration()
        .context("invalid test configuration")?;
    let storage = config
        .storage_config()
        .context("invalid storage configuration")?;
    config.log_settings();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("blobtester-rt")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let backend = storage.into_backend().context("failed to set up storage")?;
        let container = Container::create_if_absent(backend, config.container_name.as_str())
            .await
            .context("failed to create container")?;
        tracing::info!(
            backend = container.backend_name(),
            container = container.name(),
            "container ready"
        );

        let sink = Arc::new(MetricsSink::new(CsvSink::stdout()));
        let coordinator = Coordinator::new(test, container, sink.clone());

        let cancel = coordinator.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing runs in progress");
                cancel.cancel();
            }
        });

        let start = Instant::now();
        let summary = coordinator.run().await;
        let metrics = sink.take_metrics();
        metrics.print_summary(start.elapsed());

        if summary.panicked > 0 {
            tracing::error!(workers = summary.panicked, "workers panicked");
        }
        let clean = metrics.is_clean() && summary.panicked == 0;
        Ok(if clean {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    })
}
