//! The capability interface the synchronization engine consumes from a secret store

use anyhow::Result;
use async_trait::async_trait;

use crate::secret::{Secret, SecretData};

/// What lives at a path.
///
/// Stores do not separate values from folders: the same path can hold a secret and also be the
/// parent of other secrets, hence [`NodeKind::Both`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Missing,
    Leaf,
    Directory,
    Both,
}

impl NodeKind {
    pub fn from_flags(has_value: bool, has_children: bool) -> Self {
        match (has_value, has_children) {
            (false, false) => NodeKind::Missing,
            (true, false) => NodeKind::Leaf,
            (false, true) => NodeKind::Directory,
            (true, true) => NodeKind::Both,
        }
    }

    pub fn has_value(self) -> bool {
        matches!(self, NodeKind::Leaf | NodeKind::Both)
    }

    pub fn has_children(self) -> bool {
        matches!(self, NodeKind::Directory | NodeKind::Both)
    }
}

/// Everything the walker needs to know about one path.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub secret: Option<Secret>,
    /// Names of the entries directly below the path.
    pub children: Vec<String>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_flags(self.secret.is_some(), !self.children.is_empty())
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Read the secret at `path`, `None` if there is no value there.
    async fn read_secret(&self, path: &str) -> Result<Option<Secret>>;

    async fn node_kind(&self, path: &str) -> Result<NodeKind> {
        Ok(self.inspect(path).await?.kind())
    }

    /// Names (not full paths) of the entries directly below `path`.
    async fn list_children(&self, path: &str) -> Result<Vec<String>>;

    async fn write_secret(&self, path: &str, data: &SecretData) -> Result<()>;

    /// List and read `path` once, so walking a tree costs one read per secret.
    async fn inspect(&self, path: &str) -> Result<Node> {
        let children = self.list_children(path).await?;
        let secret = self.read_secret(path).await?;
        Ok(Node { secret, children })
    }

    async fn is_directory(&self, path: &str) -> Result<bool> {
        Ok(self.node_kind(path).await?.has_children())
    }

    async fn secret_exists(&self, path: &str) -> Result<bool> {
        Ok(self.read_secret(path).await?.is_some())
    }

    /// Resolve a glob pattern into concrete secret paths, see [`crate::wildcard::expand`].
    async fn expand_wildcard(&self, pattern: &str) -> Result<Vec<String>> {
        crate::wildcard::expand(self, pattern).await
    }
}
