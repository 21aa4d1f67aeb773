//! Common library for the `vault-copy` tool
//!
//! This crate holds everything behind the command line: the secret store capability and its
//! implementations, the synchronization engine and the runtime bootstrap.
//!
//! # Overview
//!
//! - [`store`] - the [`store::SecretStore`] trait every store implements
//! - [`vault`] - [`vault::VaultClient`], a store speaking the Vault HTTP API
//! - `memory` - `MemoryStore`, a store held in memory for tests (feature `testutils`)
//! - [`path`] - path helpers and the source-to-destination transformation
//! - [`wildcard`] - glob expansion over a store's namespace
//! - [`walk`] - concurrent enumeration of secret trees
//! - [`sync`] - the [`sync::SyncEngine`] copying secrets between stores
//! - [`progress`] - run counters, summary and progress reporting
//!
//! # Running a Synchronization
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use common::sync::{Settings, SyncEngine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let source = Arc::new(common::vault::VaultClient::connect("source", "http://vault-a:8200", "token-a").await?);
//! let destination = Arc::new(common::vault::VaultClient::connect("destination", "http://vault-b:8200", "token-b").await?);
//! let settings = Settings {
//!     source_path: "secret/data/apps".to_string(),
//!     destination_path: "secret/data/apps-copy".to_string(),
//!     recursive: true,
//!     ..Default::default()
//! };
//! let summary = SyncEngine::new(source, destination, settings).sync().await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! Binaries call [`run`] to set up logging, the tokio runtime, throttling and progress reporting
//! around the actual work.

use std::io::IsTerminal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod config;
#[cfg(any(test, feature = "testutils"))]
pub mod memory;
pub mod path;
pub mod progress;
pub mod secret;
pub mod store;
pub mod sync;
pub mod vault;
pub mod walk;
pub mod wildcard;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, RuntimeConfig, ThrottleConfig};
pub use progress::{Summary, SyncStats};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressType {
    #[default]
    #[value(alias = "Auto")]
    Auto,
    #[value(alias = "ProgressBar")]
    ProgressBar,
    #[value(alias = "TextUpdates")]
    TextUpdates,
}

pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// time between updates, defaults depend on the progress type
    pub progress_delay: Option<std::time::Duration>,
    pub stats: Arc<SyncStats>,
}

const BAR_DELAY: std::time::Duration = std::time::Duration::from_millis(200);
const TEXT_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

async fn show_progress(settings: ProgressSettings, cancel: CancellationToken) {
    let interactive = match settings.progress_type {
        ProgressType::Auto => std::io::stderr().is_terminal(),
        ProgressType::ProgressBar => true,
        ProgressType::TextUpdates => false,
    };
    let delay = settings
        .progress_delay
        .unwrap_or(if interactive { BAR_DELAY } else { TEXT_DELAY });
    let mut printer = progress::ProgressPrinter::new(&settings.stats);
    if interactive {
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(
            indicatif::ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        loop {
            bar.set_message(printer.status_line());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => bar.tick(),
            }
        }
        bar.finish_and_clear();
        return;
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => match printer.print() {
                Ok(report) => eprintln!("{report}"),
                Err(error) => tracing::error!("failed rendering progress: {:#}", error),
            },
        }
    }
}

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.log_level()));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn setup_throttle(runtime: &tokio::runtime::Runtime, throttle: &ThrottleConfig) {
    if throttle.max_concurrent_requests > 0 {
        throttle::set_max_requests(throttle.max_concurrent_requests);
    }
    if throttle.ops_throttle > 0 {
        let (tokens, interval) = throttle::ops_replenish_schedule(throttle.ops_throttle);
        tracing::debug!("throttling to {} requests every {:?}", tokens, interval);
        throttle::init_ops_tokens(tokens);
        runtime.spawn(throttle::run_ops_replenish_thread(tokens, interval));
    }
}

/// Run `func` on a new tokio runtime and report its outcome.
///
/// Returns `None` if the runtime could not be built or `func` failed, the error is printed to
/// stderr unless `output.quiet` is set. The summary of a successful run is printed to stdout when
/// `output.print_summary` is set.
pub fn run<Fut>(
    progress: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle: ThrottleConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed building tokio runtime: {error}");
            }
            return None;
        }
    };
    setup_throttle(&rt, &throttle);
    let progress_cancel = CancellationToken::new();
    let progress_task =
        progress.map(|settings| rt.spawn(show_progress(settings, progress_cancel.clone())));
    let res = rt.block_on(func());
    progress_cancel.cancel();
    if let Some(task) = progress_task {
        if let Err(error) = rt.block_on(task) {
            tracing::error!("progress task failed: {}", error);
        }
    }
    match res {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_summary() {
        let summary = run(
            None,
            OutputConfig::default(),
            RuntimeConfig {
                max_workers: 2,
                max_blocking_threads: 0,
            },
            ThrottleConfig::default(),
            || async {
                Ok(Summary {
                    read: 1,
                    written: 1,
                    ..Default::default()
                })
            },
        );
        assert_eq!(summary.map(|s| s.written), Some(1));
    }

    #[test]
    fn run_reports_failure_as_none() {
        let output = OutputConfig {
            quiet: true,
            ..Default::default()
        };
        let summary = run(
            None,
            output,
            RuntimeConfig::default(),
            ThrottleConfig::default(),
            || async { Err(anyhow::anyhow!("no source")) },
        );
        assert!(summary.is_none());
    }

    #[test]
    fn progress_task_stops_with_the_run() {
        let stats = Arc::new(SyncStats::new());
        let progress = ProgressSettings {
            progress_type: ProgressType::TextUpdates,
            progress_delay: Some(std::time::Duration::from_millis(5)),
            stats: stats.clone(),
        };
        let summary = run(
            Some(progress),
            OutputConfig::default(),
            RuntimeConfig::default(),
            ThrottleConfig::default(),
            || async move {
                stats.read.add(2);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(stats.summary())
            },
        );
        assert_eq!(summary.map(|s| s.read), Some(2));
    }
}
