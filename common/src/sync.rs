//! The synchronization engine
//!
//! A run copies the secrets selected by the source path to the destination store:
//!
//! - a source path with glob tokens is expanded and every match is copied,
//! - a secret is copied on its own,
//! - a directory is enumerated and copied recursively (only if requested).
//!
//! Wildcard and directory runs use a pipeline: one producer task walks the source tree into a
//! bounded channel and a pool of transfer workers writes what it receives. Failures of single
//! secrets are counted and do not stop the run.
//!
//! # Error Handling
//!
//! [`SyncEngine::sync`] fails only if the run cannot start, see [`Error::Setup`]. Everything that
//! goes wrong afterwards ends up in [`Summary::errors`].

use anyhow::{Context, anyhow};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::path;
use crate::progress::{Summary, SyncStats};
use crate::secret::Secret;
use crate::store::{NodeKind, SecretStore};
use crate::walk::{TreeWalker, Visit};
use crate::wildcard;

pub const DEFAULT_PARALLELISM: usize = 5;
pub const DEFAULT_TRAVERSAL_WORKERS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The run could not start: invalid settings, missing source, nothing to copy...
    #[error("{0:#}")]
    Setup(#[source] anyhow::Error),
    /// Inspecting, listing or reading the source failed while discovering secrets.
    #[error("{0:#}")]
    Enumeration(#[source] anyhow::Error),
    #[error("failed copying to {path:?}: {source:#}")]
    Write {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("synchronization cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub source_path: String,
    pub destination_path: String,
    pub recursive: bool,
    pub dry_run: bool,
    pub overwrite: bool,
    /// number of transfer workers
    pub parallelism: usize,
    /// number of workers enumerating the source tree
    pub traversal_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_path: String::new(),
            destination_path: String::new(),
            recursive: false,
            dry_run: false,
            overwrite: false,
            parallelism: DEFAULT_PARALLELISM,
            traversal_workers: DEFAULT_TRAVERSAL_WORKERS,
        }
    }
}

fn is_valid_destination_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/'
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_paths(&self.source_path, &self.destination_path)?;
        if self.parallelism == 0 {
            return Err(anyhow!("parallelism must be at least 1"));
        }
        if self.traversal_workers == 0 {
            return Err(anyhow!("number of traversal workers must be at least 1"));
        }
        Ok(())
    }
}

/// Check the source and destination paths on their own, before anything else is resolved.
pub fn validate_paths(source_path: &str, destination: &str) -> anyhow::Result<()> {
    if source_path.trim_matches('/').is_empty() {
        return Err(anyhow!("source path is required"));
    }
    if destination.trim_matches('/').is_empty() {
        return Err(anyhow!("destination path is required"));
    }
    if destination.contains("..") || destination.contains("//") {
        return Err(anyhow!(
            "invalid destination path {destination:?}: must not contain '..' or '//'"
        ));
    }
    if let Some(c) = destination.chars().find(|c| !is_valid_destination_char(*c)) {
        return Err(anyhow!(
            "invalid destination path {destination:?}: character {c:?} is not allowed \
            (letters, digits, '-', '_' and '/' only)"
        ));
    }
    Ok(())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Outcome {
    Written,
    Skipped,
    DryRun,
}

/// Applies the conflict policy to one secret and writes it.
#[derive(Clone)]
struct Transfer {
    destination: Arc<dyn SecretStore>,
    source_root: String,
    destination_root: String,
    dry_run: bool,
    overwrite: bool,
}

impl Transfer {
    async fn apply(&self, secret: Secret) -> Result<Outcome, Error> {
        let target = path::transform(&secret.path, &self.source_root, &self.destination_root);
        let exists = self
            .destination
            .secret_exists(&target)
            .await
            .with_context(|| format!("failed checking {target:?} in {}", self.destination.name()))
            .map_err(|source| Error::Write {
                path: target.clone(),
                source,
            })?;
        if exists && !self.overwrite {
            tracing::debug!("{:?} already exists, skipping {:?}", target, secret.path);
            return Ok(Outcome::Skipped);
        }
        if self.dry_run {
            tracing::info!("dry-run: would copy {:?} to {:?}", secret.path, target);
            return Ok(Outcome::DryRun);
        }
        self.destination
            .write_secret(&target, &secret.data)
            .await
            .with_context(|| format!("failed writing to {}", self.destination.name()))
            .map_err(|source| Error::Write {
                path: target.clone(),
                source,
            })?;
        tracing::info!("copied {:?} to {:?}", secret.path, target);
        Ok(Outcome::Written)
    }
}

fn record(stats: &SyncStats, outcome: Outcome) {
    match outcome {
        Outcome::Written | Outcome::DryRun => stats.written.inc(),
        Outcome::Skipped => stats.skipped.inc(),
    }
}

/// Sending side of the error channel; cancellation is reported at most once per run.
#[derive(Clone)]
struct ErrorSink {
    tx: async_channel::Sender<Error>,
    cancel_reported: Arc<AtomicBool>,
}

impl ErrorSink {
    fn report(&self, error: Error) {
        if matches!(error, Error::Cancelled) && self.cancel_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(error) = self.tx.try_send(error) {
            tracing::error!("dropped error report: {:#}", error.into_inner());
        }
    }
}

pub struct SyncEngine {
    source: Arc<dyn SecretStore>,
    destination: Arc<dyn SecretStore>,
    settings: Settings,
    stats: Arc<SyncStats>,
    cancel: CancellationToken,
    span: tracing::Span,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn SecretStore>,
        destination: Arc<dyn SecretStore>,
        settings: Settings,
    ) -> Self {
        let span = tracing::info_span!(
            "sync",
            source = %settings.source_path,
            destination = %settings.destination_path
        );
        Self {
            source,
            destination,
            settings,
            stats: Arc::new(SyncStats::new()),
            cancel: CancellationToken::new(),
            span,
        }
    }

    /// Count into `stats` instead of a private set of counters, e.g. to show live progress.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<SyncStats>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    /// Run the synchronization and return its final counters.
    pub async fn sync(&self) -> Result<Summary, Error> {
        let span = self.span.clone();
        self.run().instrument(span).await
    }

    async fn run(&self) -> Result<Summary, Error> {
        self.settings.validate().map_err(Error::Setup)?;
        let source_path = &self.settings.source_path;
        if wildcard::has_glob(source_path) {
            let matches = self
                .source
                .expand_wildcard(source_path)
                .await
                .with_context(|| format!("failed expanding {source_path:?}"))
                .map_err(Error::Setup)?;
            if matches.is_empty() {
                return Err(Error::Setup(anyhow!(
                    "no secrets match {source_path:?} in {}",
                    self.source.name()
                )));
            }
            tracing::info!("{} secrets match {:?}", matches.len(), source_path);
            let seeds = matches.into_iter().map(Visit::Leaf).collect();
            return Ok(self
                .run_pipeline(seeds, wildcard::literal_prefix(source_path))
                .await);
        }
        let kind = self
            .source
            .node_kind(source_path)
            .await
            .with_context(|| format!("failed inspecting source path {source_path:?}"))
            .map_err(Error::Setup)?;
        tracing::debug!("source path is {:?}", kind);
        match kind {
            NodeKind::Missing => Err(Error::Setup(anyhow!(
                "source path {source_path:?} does not exist in {}",
                self.source.name()
            ))),
            NodeKind::Leaf => self.sync_single().await,
            NodeKind::Both if !self.settings.recursive => {
                tracing::info!(
                    "{:?} is also a directory, copying only its own value (recursive mode is off)",
                    source_path
                );
                self.sync_single().await
            }
            NodeKind::Directory if !self.settings.recursive => Err(Error::Setup(anyhow!(
                "source path {source_path:?} is a directory, use recursive mode to copy it"
            ))),
            NodeKind::Directory | NodeKind::Both => Ok(self
                .run_pipeline(vec![Visit::Tree(source_path.clone())], source_path.clone())
                .await),
        }
    }

    fn transfer(&self, source_root: String) -> Transfer {
        Transfer {
            destination: self.destination.clone(),
            source_root,
            destination_root: self.settings.destination_path.clone(),
            dry_run: self.settings.dry_run,
            overwrite: self.settings.overwrite,
        }
    }

    async fn sync_single(&self) -> Result<Summary, Error> {
        let source_path = &self.settings.source_path;
        let secret = self
            .source
            .read_secret(source_path)
            .await
            .with_context(|| format!("failed reading {source_path:?}"))
            .map_err(Error::Setup)?
            .ok_or_else(|| {
                Error::Setup(anyhow!(
                    "secret {source_path:?} not found in {}",
                    self.source.name()
                ))
            })?;
        self.stats.read.inc();
        let transfer = self.transfer(source_path.clone());
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = transfer.apply(secret) => result,
        };
        match result {
            Ok(outcome) => record(&self.stats, outcome),
            Err(error) => {
                tracing::error!("{:#}", error);
                self.stats.errors.inc();
            }
        }
        Ok(self.stats.summary())
    }

    async fn run_pipeline(&self, seeds: Vec<Visit>, source_root: String) -> Summary {
        let parallelism = self.settings.parallelism;
        let (secret_tx, secret_rx) = async_channel::bounded::<Secret>(2 * parallelism);
        let (error_tx, error_rx) = async_channel::unbounded::<Error>();
        let errors = ErrorSink {
            tx: error_tx,
            cancel_reported: Arc::new(AtomicBool::new(false)),
        };
        let producer = {
            let walker = TreeWalker::new(
                self.source.clone(),
                self.settings.traversal_workers,
                self.cancel.clone(),
                self.span.clone(),
            );
            let errors = errors.clone();
            let stats = self.stats.clone();
            tokio::spawn(
                async move {
                    match walker.walk(seeds, &secret_tx).await {
                        Ok(count) => tracing::debug!("discovered {} secrets", count),
                        Err(error) => {
                            // the path that failed to enumerate counts as one item read
                            if matches!(error, Error::Enumeration(_)) {
                                stats.read.inc();
                            }
                            errors.report(error);
                        }
                    }
                    // dropping the last sender lets the workers drain and exit
                    drop(secret_tx);
                }
                .instrument(self.span.clone()),
            )
        };
        let mut workers = tokio::task::JoinSet::new();
        let transfer = self.transfer(source_root);
        for _ in 0..parallelism {
            let secrets = secret_rx.clone();
            let transfer = transfer.clone();
            let errors = errors.clone();
            let stats = self.stats.clone();
            let cancel = self.cancel.clone();
            workers.spawn(
                async move {
                    loop {
                        let secret = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                errors.report(Error::Cancelled);
                                break;
                            }
                            secret = secrets.recv() => match secret {
                                Ok(secret) => secret,
                                Err(_) => break,
                            },
                        };
                        stats.read.inc();
                        match transfer.apply(secret).await {
                            Ok(outcome) => record(&stats, outcome),
                            Err(error) => errors.report(error),
                        }
                    }
                }
                .instrument(self.span.clone()),
            );
        }
        drop(secret_rx);
        let coordinator = {
            let errors = errors.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(join_error) = producer.await {
                    stats.read.inc();
                    errors.report(Error::Enumeration(
                        anyhow!(join_error).context("secret producer failed"),
                    ));
                }
                while let Some(res) = workers.join_next().await {
                    if let Err(join_error) = res {
                        errors.report(Error::Enumeration(
                            anyhow!(join_error).context("transfer worker failed"),
                        ));
                    }
                }
                // the last error sender goes away with `errors`
            })
        };
        drop(errors);
        while let Ok(error) = error_rx.recv().await {
            match &error {
                Error::Cancelled => tracing::warn!("{}", error),
                _ => tracing::error!("{:#}", error),
            }
            self.stats.errors.inc();
        }
        if let Err(join_error) = coordinator.await {
            tracing::error!("coordinator failed: {:#}", join_error);
            self.stats.errors.inc();
        }
        let summary = self.stats.summary();
        tracing::info!(
            "finished: read {}, written {}, skipped {}, errors {}",
            summary.read,
            summary.written,
            summary.skipped,
            summary.errors
        );
        summary
    }
}
