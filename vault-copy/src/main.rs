use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use vault_copy::settings::{FileConfig, Overrides, Resolved};

/// Exit code of a run that could not start.
const EXIT_SETUP_FAILURE: i32 = 1;
/// Exit code of a run that finished but failed to copy some secrets.
const EXIT_ITEM_ERRORS: i32 = 2;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "vault-copy",
    version,
    about = "Copy secrets between Vault KV engines - single secrets, whole trees or wildcard selections",
    long_about = "`vault-copy` copies secrets from one Vault server (or KV engine) to another.

The source path may name a single secret, a directory (copied with --recursive) or contain glob
patterns in any segment (`*`, `?`, `[...]`), e.g. `secret/data/apps/*/database`. Secrets are copied
relative to the source path (or, for patterns, relative to the part in front of the first glob).

Existing destination secrets are left alone unless --overwrite is given.

EXAMPLE:
    # Copy a tree to another server, previewing first
    vault-copy --src-path secret/apps --dst-path secret/apps-copy -r --dry-run \\
        --src-addr https://vault-a:8200 --dst-addr https://vault-b:8200

Addresses and tokens can also come from VAULT_SOURCE_ADDR, VAULT_SOURCE_TOKEN, VAULT_DEST_ADDR,
VAULT_DEST_TOKEN, the config file, and finally VAULT_ADDR and VAULT_TOKEN.

Exit status is 0 on success, 1 if the copy could not start and 2 if some secrets failed to copy."
)]
struct Args {
    // Paths
    /// Source secret, directory or glob pattern, e.g. secret/data/apps/*
    #[arg(long, value_name = "PATH", help_heading = "Paths")]
    src_path: String,

    /// Destination path
    #[arg(long, value_name = "PATH", help_heading = "Paths")]
    dst_path: String,

    // Copy options
    /// Copy directories recursively
    #[arg(short = 'r', long, help_heading = "Copy options")]
    recursive: bool,

    /// Show what would be copied without writing anything
    #[arg(long, help_heading = "Copy options")]
    dry_run: bool,

    /// Overwrite secrets that already exist at the destination
    #[arg(short = 'o', long, help_heading = "Copy options")]
    overwrite: bool,

    /// Number of secrets copied in parallel (default: 5)
    #[arg(long, value_name = "N", help_heading = "Copy options")]
    parallel: Option<usize>,

    /// Number of workers listing the source tree
    #[arg(
        long,
        default_value_t = common::sync::DEFAULT_TRAVERSAL_WORKERS,
        value_name = "N",
        help_heading = "Copy options"
    )]
    traversal_workers: usize,

    // Connection
    /// Source Vault address
    #[arg(long, value_name = "URL", help_heading = "Connection")]
    src_addr: Option<String>,

    /// Source Vault token
    #[arg(long, value_name = "TOKEN", help_heading = "Connection")]
    src_token: Option<String>,

    /// Destination Vault address (default: the source address)
    #[arg(long, value_name = "URL", help_heading = "Connection")]
    dst_addr: Option<String>,

    /// Destination Vault token
    #[arg(long, value_name = "TOKEN", help_heading = "Connection")]
    dst_token: Option<String>,

    /// YAML config file (default: config.yaml, if present)
    #[arg(long, value_name = "PATH", help_heading = "Connection")]
    config: Option<std::path::PathBuf>,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Toggles the type of progress to show
    ///
    /// If specified, --progress flag is implied.
    ///
    /// Options are: `ProgressBar` (animated progress bar), `TextUpdates` (appropriate for logging), Auto (default, will
    /// choose between `ProgressBar` or `TextUpdates` depending on the type of terminal attached to stderr)
    #[arg(long, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Sets the delay between progress updates
    ///
    /// Default is 200ms for interactive mode (`ProgressBar`) and 10s for non-interactive mode (`TextUpdates`). If
    /// specified, --progress flag is implied. Accepts human-readable durations like "200ms", "10s", "5min".
    #[arg(long, value_name = "DELAY", value_parser = humantime::parse_duration, help_heading = "Progress & output")]
    progress_delay: Option<std::time::Duration>,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Maximum number of requests in flight per run, 0 means no limit
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    max_concurrent_requests: usize,

    /// Throttle the number of requests per second, 0 means no throttle
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    ops_throttle: usize,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            src_addr: self.src_addr.clone(),
            src_token: self.src_token.clone(),
            dst_addr: self.dst_addr.clone(),
            dst_token: self.dst_token.clone(),
            recursive: self.recursive,
            dry_run: self.dry_run,
            overwrite: self.overwrite,
            parallel: self.parallel,
            verbose: self.verbose,
        }
    }

    fn show_progress(&self) -> bool {
        self.progress || self.progress_type.is_some() || self.progress_delay.is_some()
    }
}

#[instrument(skip_all)]
async fn async_main(
    resolved: Resolved,
    settings: common::sync::Settings,
    stats: Arc<common::SyncStats>,
) -> Result<common::Summary> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling the copy");
                cancel.cancel();
            }
        })
    };
    let source = common::vault::VaultClient::connect(
        "source",
        &resolved.source.address,
        &resolved.source.token,
    )
    .await?;
    let destination = common::vault::VaultClient::connect(
        "destination",
        &resolved.destination.address,
        &resolved.destination.token,
    )
    .await?;
    let engine = common::sync::SyncEngine::new(Arc::new(source), Arc::new(destination), settings)
        .with_stats(stats)
        .with_cancellation(cancel);
    let summary = engine.sync().await;
    interrupt.abort();
    summary.map_err(anyhow::Error::from)
}

fn setup_failure(error: &anyhow::Error, quiet: bool) -> ! {
    if !quiet {
        eprintln!("{error:#}");
    }
    std::process::exit(EXIT_SETUP_FAILURE);
}

fn main() -> Result<()> {
    let args = Args::parse();
    // bad paths are reported before missing tokens
    if let Err(error) = common::sync::validate_paths(
        &common::path::normalize_kv_path(&args.src_path),
        &common::path::normalize_kv_path(&args.dst_path),
    ) {
        setup_failure(&error, args.quiet);
    }
    let file = FileConfig::load(args.config.as_deref())
        .unwrap_or_else(|error| setup_failure(&error, args.quiet));
    let resolved = vault_copy::settings::resolve(&args.overrides(), &file, |name| {
        std::env::var(name).ok()
    })
    .unwrap_or_else(|error| setup_failure(&error, args.quiet));
    let settings = resolved.sync_settings(&args.src_path, &args.dst_path, args.traversal_workers);
    if let Err(error) = settings.validate() {
        setup_failure(&error, args.quiet);
    }
    let dry_run = settings.dry_run;
    let stats = Arc::new(common::SyncStats::new());
    let func = {
        let resolved = resolved.clone();
        let stats = stats.clone();
        || async_main(resolved, settings, stats)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: resolved.verbose,
        print_summary: true,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_concurrent_requests: args.max_concurrent_requests,
        ops_throttle: args.ops_throttle,
    };
    let progress = args.show_progress().then(|| common::ProgressSettings {
        progress_type: args.progress_type.unwrap_or_default(),
        progress_delay: args.progress_delay,
        stats,
    });
    let Some(summary) = common::run(progress, output, runtime, throttle, func) else {
        std::process::exit(EXIT_SETUP_FAILURE);
    };
    if dry_run {
        println!("\ndry-run: no secrets were written");
    }
    if summary.has_errors() {
        std::process::exit(EXIT_ITEM_ERRORS);
    }
    Ok(())
}
