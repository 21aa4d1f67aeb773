//! In-memory secret store
//!
//! Holds secrets in a sorted map keyed by path. Directories are implied by key prefixes, so a path
//! can hold a value and have children at the same time, same as a real KV engine. Reads and writes
//! can be made to fail per path and every operation can be slowed down, which makes this store the
//! test double for the engine.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::secret::{Secret, SecretData};
use crate::store::{NodeKind, SecretStore};

fn key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn child_prefix(path: &str) -> String {
    let path = key(path);
    if path.is_empty() { path } else { path + "/" }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    secrets: Mutex<BTreeMap<String, SecretData>>,
    failing_reads: Mutex<BTreeSet<String>>,
    failing_writes: Mutex<BTreeSet<String>>,
    latency: Option<std::time::Duration>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Delay every store operation by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, path: &str, data: SecretData) {
        locked(&self.secrets).insert(key(path), data);
    }

    pub fn get(&self, path: &str) -> Option<SecretData> {
        locked(&self.secrets).get(&key(path)).cloned()
    }

    pub fn len(&self) -> usize {
        locked(&self.secrets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make reads of (and kind queries for) `path` fail.
    pub fn fail_reads_of(&self, path: &str) {
        locked(&self.failing_reads).insert(key(path));
    }

    pub fn fail_writes_to(&self, path: &str) {
        locked(&self.failing_writes).insert(key(path));
    }

    /// Number of reads, including reads of paths without a value.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_readable(&self, path: &str) -> Result<()> {
        if locked(&self.failing_reads).contains(&key(path)) {
            bail!("{}: injected read failure for {:?}", self.name, path);
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_secret(&self, path: &str) -> Result<Option<Secret>> {
        self.delay().await;
        self.check_readable(path)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.get(path).map(|data| Secret::new(key(path), data)))
    }

    async fn node_kind(&self, path: &str) -> Result<NodeKind> {
        self.delay().await;
        self.check_readable(path)?;
        let prefix = child_prefix(path);
        let secrets = locked(&self.secrets);
        let has_value = !prefix.is_empty() && secrets.contains_key(&key(path));
        let has_children = secrets
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix));
        Ok(NodeKind::from_flags(has_value, has_children))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        self.delay().await;
        self.check_readable(path)?;
        let prefix = child_prefix(path);
        let secrets = locked(&self.secrets);
        let children: BTreeSet<String> = secrets
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        Ok(children.into_iter().collect())
    }

    async fn write_secret(&self, path: &str, data: &SecretData) -> Result<()> {
        self.delay().await;
        if locked(&self.failing_writes).contains(&key(path)) {
            bail!("{}: injected write failure for {:?}", self.name, path);
        }
        self.insert(path, data.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
