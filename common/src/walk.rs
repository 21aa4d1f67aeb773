//! Enumeration of the secrets below one or more roots
//!
//! [`TreeWalker`] keeps pending paths in a work queue served by a fixed number of traversal
//! workers, so the amount of concurrent listing is bounded no matter how wide the tree is. Every
//! secret found is sent to a channel consumed by the transfer workers.

use anyhow::{Context, anyhow};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::path;
use crate::secret::Secret;
use crate::store::{NodeKind, SecretStore};
use crate::sync::Error;

/// Every secret path below (and including) `root`, discovered one level at a time.
pub async fn leaf_paths<S: SecretStore + ?Sized>(
    store: &S,
    root: &str,
) -> anyhow::Result<Vec<String>> {
    let mut leaves = Vec::new();
    let mut pending = vec![root.to_string()];
    while let Some(current) = pending.pop() {
        let node = store
            .inspect(&current)
            .await
            .with_context(|| format!("failed inspecting {current:?} in {}", store.name()))?;
        pending.extend(node.children.iter().map(|child| path::join(&current, child)));
        if node.secret.is_some() {
            leaves.push(current);
        }
    }
    Ok(leaves)
}

/// A unit of traversal work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit {
    /// Emit the value at the path (if any) and everything below it.
    Tree(String),
    /// Emit exactly the secret at the path.
    Leaf(String),
}

struct Shared {
    store: Arc<dyn SecretStore>,
    queue: async_channel::Sender<Visit>,
    pending: AtomicUsize,
    emitted: AtomicU64,
    // child of the run's cancellation token, also fired on the first failure
    halt: CancellationToken,
    sink: async_channel::Sender<Secret>,
}

impl Shared {
    fn push(&self, visit: Visit) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.queue.try_send(visit).is_err() {
            // queue is only closed once the walk is halted
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.queue.close();
        }
    }

    async fn guarded<T, F>(&self, op: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.halt.cancelled() => Err(Error::Cancelled),
            result = op => result.map_err(Error::Enumeration),
        }
    }

    async fn emit(&self, path: &str) -> Result<(), Error> {
        let secret = self
            .guarded(async {
                self.store
                    .read_secret(path)
                    .await
                    .with_context(|| format!("failed reading {path:?} from {}", self.store.name()))?
                    .ok_or_else(|| anyhow!("secret {path:?} not found in {}", self.store.name()))
            })
            .await?;
        self.send(secret).await
    }

    async fn send(&self, secret: Secret) -> Result<(), Error> {
        tracing::trace!("emitting {:?}", secret.path);
        tokio::select! {
            biased;
            _ = self.halt.cancelled() => return Err(Error::Cancelled),
            sent = self.sink.send(secret) => {
                sent.map_err(|_| Error::Enumeration(anyhow!("secret channel closed")))?;
            }
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn visit(&self, visit: Visit) -> Result<(), Error> {
        let path = match visit {
            Visit::Leaf(path) => return self.emit(&path).await,
            Visit::Tree(path) => path,
        };
        let node = self
            .guarded(async {
                self.store
                    .inspect(&path)
                    .await
                    .with_context(|| format!("failed inspecting {path:?} in {}", self.store.name()))
            })
            .await?;
        if node.kind() == NodeKind::Missing {
            return Err(Error::Enumeration(anyhow!(
                "{path:?} not found in {}",
                self.store.name()
            )));
        }
        tracing::debug!("{:?} has {} children", path, node.children.len());
        for child in &node.children {
            self.push(Visit::Tree(path::join(&path, child)));
        }
        if let Some(secret) = node.secret {
            // the value read while inspecting is the one sent on
            self.send(secret).await?;
        }
        Ok(())
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    queue: async_channel::Receiver<Visit>,
) -> Result<(), Error> {
    loop {
        let visit = tokio::select! {
            biased;
            _ = shared.halt.cancelled() => return Err(Error::Cancelled),
            visit = queue.recv() => match visit {
                Ok(visit) => visit,
                // queue closed, all work is done
                Err(_) => return Ok(()),
            },
        };
        let result = shared.visit(visit).await;
        shared.finish_one();
        if let Err(error) = result {
            shared.halt.cancel();
            shared.queue.close();
            return Err(error);
        }
    }
}

pub struct TreeWalker {
    store: Arc<dyn SecretStore>,
    workers: usize,
    cancel: CancellationToken,
    span: tracing::Span,
}

impl TreeWalker {
    pub fn new(
        store: Arc<dyn SecretStore>,
        workers: usize,
        cancel: CancellationToken,
        span: tracing::Span,
    ) -> Self {
        Self {
            store,
            workers: workers.max(1),
            cancel,
            span,
        }
    }

    /// Send every secret reachable from `seeds` to `sink`, returns how many were sent.
    ///
    /// Stops at the first failure to inspect, list or read a path and returns it; secrets sent
    /// before that stay in the channel. Returns [`Error::Cancelled`] if the run was cancelled.
    pub async fn walk(
        &self,
        seeds: Vec<Visit>,
        sink: &async_channel::Sender<Secret>,
    ) -> Result<u64, Error> {
        if seeds.is_empty() {
            return Ok(0);
        }
        let (queue_tx, queue_rx) = async_channel::unbounded();
        let shared = Arc::new(Shared {
            store: self.store.clone(),
            queue: queue_tx,
            pending: AtomicUsize::new(0),
            emitted: AtomicU64::new(0),
            halt: self.cancel.child_token(),
            sink: sink.clone(),
        });
        for seed in seeds {
            shared.push(seed);
        }
        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..self.workers {
            join_set.spawn(run_worker(shared.clone(), queue_rx.clone()).instrument(self.span.clone()));
        }
        drop(queue_rx);
        let mut failure = None;
        let mut cancelled = false;
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(Error::Cancelled)) => cancelled = true,
                Ok(Err(error)) => {
                    if failure.is_none() {
                        failure = Some(error);
                    } else {
                        tracing::debug!("further traversal failure: {:#}", error);
                    }
                }
                Err(join_error) => {
                    shared.halt.cancel();
                    failure.get_or_insert(Error::Enumeration(
                        anyhow!(join_error).context("traversal worker failed"),
                    ));
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(shared.emitted.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testutils::{self, TREE_SECRETS};
    use std::collections::BTreeSet;
    use tracing_test::traced_test;

    fn walker(store: MemoryStore, workers: usize) -> TreeWalker {
        TreeWalker::new(
            Arc::new(store),
            workers,
            CancellationToken::new(),
            tracing::Span::none(),
        )
    }

    async fn collect(
        walker: &TreeWalker,
        seeds: Vec<Visit>,
    ) -> (Result<u64, Error>, BTreeSet<String>) {
        let (tx, rx) = async_channel::unbounded();
        let result = walker.walk(seeds, &tx).await;
        let mut paths = BTreeSet::new();
        while let Ok(secret) = rx.try_recv() {
            paths.insert(secret.path);
        }
        (result, paths)
    }

    #[tokio::test]
    async fn leaf_paths_include_values_on_directories() -> Result<(), anyhow::Error> {
        let store = testutils::tree_store();
        let leaves: BTreeSet<String> = leaf_paths(&store, "secret/data/source")
            .await?
            .into_iter()
            .collect();
        let expected: BTreeSet<String> = TREE_SECRETS.iter().map(|p| p.to_string()).collect();
        assert_eq!(leaves, expected);
        assert!(leaf_paths(&store, "secret/data/nothing").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn walks_entire_tree() -> Result<(), anyhow::Error> {
        for workers in [1, 3, 16] {
            let walker = walker(testutils::tree_store(), workers);
            let (result, paths) =
                collect(&walker, vec![Visit::Tree("secret/data/source".to_string())]).await;
            assert_eq!(result?, TREE_SECRETS.len() as u64);
            let expected: BTreeSet<String> =
                TREE_SECRETS.iter().map(|p| p.to_string()).collect();
            assert_eq!(paths, expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn value_on_directory_is_emitted_with_its_children() -> Result<(), anyhow::Error> {
        let walker = walker(testutils::tree_store(), 2);
        let (result, paths) = collect(
            &walker,
            vec![Visit::Tree("secret/data/source/apps/prod".to_string())],
        )
        .await;
        assert_eq!(result?, 3);
        assert!(paths.contains("secret/data/source/apps/prod"));
        assert!(paths.contains("secret/data/source/apps/prod/db"));
        assert!(paths.contains("secret/data/source/apps/prod/cache"));
        Ok(())
    }

    #[tokio::test]
    async fn every_node_is_read_once() -> Result<(), anyhow::Error> {
        let store = Arc::new(testutils::tree_store());
        let walker = TreeWalker::new(
            store.clone(),
            3,
            CancellationToken::new(),
            tracing::Span::none(),
        );
        let (result, paths) =
            collect(&walker, vec![Visit::Tree("secret/data/source".to_string())]).await;
        assert_eq!(result?, TREE_SECRETS.len() as u64);
        assert_eq!(paths.len(), TREE_SECRETS.len());
        // source, source/apps and source/apps/dev hold no value but are inspected too
        assert_eq!(store.read_count(), TREE_SECRETS.len() + 3);
        Ok(())
    }

    #[tokio::test]
    async fn leaf_seeds_are_read_directly() -> Result<(), anyhow::Error> {
        let walker = walker(testutils::tree_store(), 4);
        let (result, paths) = collect(
            &walker,
            vec![
                Visit::Leaf("secret/data/source/app1".to_string()),
                Visit::Leaf("secret/data/source/config".to_string()),
            ],
        )
        .await;
        assert_eq!(result?, 2);
        assert_eq!(paths.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn no_seeds_is_empty() -> Result<(), anyhow::Error> {
        let walker = walker(testutils::tree_store(), 4);
        let (result, paths) = collect(&walker, vec![]).await;
        assert_eq!(result?, 0);
        assert!(paths.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_root_is_an_enumeration_failure() {
        let walker = walker(testutils::tree_store(), 4);
        let (result, paths) =
            collect(&walker, vec![Visit::Tree("secret/data/missing".to_string())]).await;
        assert!(matches!(result, Err(Error::Enumeration(_))));
        assert!(paths.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn read_failure_stops_the_walk() {
        let store = testutils::tree_store();
        store.fail_reads_of("secret/data/source/apps");
        let walker = walker(store, 1);
        let (result, paths) =
            collect(&walker, vec![Visit::Tree("secret/data/source".to_string())]).await;
        match result {
            Err(Error::Enumeration(error)) => {
                assert!(format!("{error:#}").contains("secret/data/source/apps"));
            }
            other => panic!("expected an enumeration failure, got {other:?}"),
        }
        // nothing below the failed directory was discovered
        assert!(paths.iter().all(|p| !p.starts_with("secret/data/source/apps/")));
    }

    #[tokio::test]
    async fn cancelled_walk_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let walker = TreeWalker::new(
            Arc::new(testutils::tree_store()),
            4,
            cancel,
            tracing::Span::none(),
        );
        let (result, paths) =
            collect(&walker, vec![Visit::Tree("secret/data/source".to_string())]).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(paths.is_empty());
    }
}
