use crate::memory::MemoryStore;
use crate::secret::{SecretData, Value};

pub fn data(pairs: &[(&str, &str)]) -> SecretData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

/// secret/data/apps
/// |- app1
/// |  |- database
/// |  |- postgres
/// |  |- postgresql
/// |  |- cache
/// |- app2
///    |- database
pub fn apps_store() -> MemoryStore {
    let store = MemoryStore::new("source");
    store.insert("secret/data/apps/app1/database", data(&[("host", "db1")]));
    store.insert("secret/data/apps/app1/postgres", data(&[("host", "pg1")]));
    store.insert(
        "secret/data/apps/app1/postgresql",
        data(&[("host", "pg2")]),
    );
    store.insert("secret/data/apps/app1/cache", data(&[("host", "redis")]));
    store.insert("secret/data/apps/app2/database", data(&[("host", "db2")]));
    store
}

/// secret/data/apps
/// |- app1     (value and directory)
/// |  |- db
/// |- web
pub fn nested_apps_store() -> MemoryStore {
    let store = MemoryStore::new("source");
    store.insert("secret/data/apps/app1", data(&[("owner", "team1")]));
    store.insert("secret/data/apps/app1/db", data(&[("host", "db1")]));
    store.insert("secret/data/apps/web", data(&[("port", "443")]));
    store
}

/// secret/data/source
/// |- app1
/// |- apps
/// |  |- prod       (value and directory)
/// |  |  |- db
/// |  |  |- cache
/// |  |- dev
/// |     |- db
/// |- config
pub fn tree_store() -> MemoryStore {
    let store = MemoryStore::new("source");
    store.insert("secret/data/source/app1", data(&[("user", "app1")]));
    store.insert("secret/data/source/apps/prod", data(&[("env", "prod")]));
    store.insert("secret/data/source/apps/prod/db", data(&[("user", "admin")]));
    store.insert("secret/data/source/apps/prod/cache", data(&[("ttl", "60")]));
    store.insert("secret/data/source/apps/dev/db", data(&[("user", "dev")]));
    store.insert("secret/data/source/config", data(&[("debug", "false")]));
    store
}

/// Paths of every secret in [`tree_store`].
pub const TREE_SECRETS: [&str; 6] = [
    "secret/data/source/app1",
    "secret/data/source/apps/dev/db",
    "secret/data/source/apps/prod",
    "secret/data/source/apps/prod/cache",
    "secret/data/source/apps/prod/db",
    "secret/data/source/config",
];
