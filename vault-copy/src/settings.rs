//! Resolution of connection and copy settings
//!
//! Every value can come from four places, highest precedence first:
//!
//! 1. a command line flag
//! 2. a tool specific environment variable (`VAULT_SOURCE_ADDR`, `VAULT_DEST_TOKEN`, ...)
//! 3. the YAML config file
//! 4. the standard Vault environment variables (`VAULT_ADDR`, `VAULT_TOKEN`) or a built-in default
//!
//! The destination falls back to the source server when nothing else names one, which makes
//! copies within a single server need only one address and token.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8200";

/// Address and token of one Vault server as written in the config file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub address: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub recursive: bool,
    pub dry_run: bool,
    pub overwrite: bool,
    pub parallel: usize,
    pub verbose: bool,
}

/// Contents of the YAML config file, every part of it is optional.
///
/// ```yaml
/// source:
///   address: https://vault-a:8200
///   token: s.xxxx
/// destination:
///   address: https://vault-b:8200
///   token: s.yyyy
/// settings:
///   recursive: true
///   parallel: 10
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub settings: FileSettings,
}

impl FileConfig {
    pub fn parse(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load the config file at `path`.
    ///
    /// Without an explicit path the default file is read if it exists; an explicitly given file
    /// must exist.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (std::path::Path::new(DEFAULT_CONFIG_FILE), false),
        };
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if !required && error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(error).with_context(|| format!("failed reading config file {path:?}"));
            }
        };
        Self::parse(&contents).with_context(|| format!("failed parsing config file {path:?}"))
    }
}

/// Values given on the command line, `None`/`false`/`0` when not given.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub src_addr: Option<String>,
    pub src_token: Option<String>,
    pub dst_addr: Option<String>,
    pub dst_token: Option<String>,
    pub recursive: bool,
    pub dry_run: bool,
    pub overwrite: bool,
    pub parallel: Option<usize>,
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub address: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source: Connection,
    pub destination: Connection,
    pub recursive: bool,
    pub dry_run: bool,
    pub overwrite: bool,
    pub parallel: usize,
    pub verbose: u8,
}

fn first_of(candidates: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
}

/// Merge command line, environment and config file values.
///
/// `env` looks up environment variables, empty values count as unset.
pub fn resolve(
    cli: &Overrides,
    file: &FileConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Resolved> {
    let source_address = first_of([
        cli.src_addr.clone(),
        env("VAULT_SOURCE_ADDR"),
        file.source.address.clone(),
        env("VAULT_ADDR"),
    ])
    .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let source_token = first_of([
        cli.src_token.clone(),
        env("VAULT_SOURCE_TOKEN"),
        file.source.token.clone(),
        env("VAULT_TOKEN"),
    ])
    .ok_or_else(|| {
        anyhow!("source token is required: use --src-token, VAULT_SOURCE_TOKEN, the config file or VAULT_TOKEN")
    })?;
    let destination_address = first_of([
        cli.dst_addr.clone(),
        env("VAULT_DEST_ADDR"),
        file.destination.address.clone(),
        env("VAULT_ADDR"),
    ]);
    let same_server = destination_address.is_none();
    let destination_token = first_of([
        cli.dst_token.clone(),
        env("VAULT_DEST_TOKEN"),
        file.destination.token.clone(),
        env("VAULT_TOKEN"),
    ])
    .or_else(|| same_server.then(|| source_token.clone()))
    .ok_or_else(|| {
        anyhow!("destination token is required: use --dst-token, VAULT_DEST_TOKEN, the config file or VAULT_TOKEN")
    })?;
    let parallel = cli
        .parallel
        .or((file.settings.parallel > 0).then_some(file.settings.parallel))
        .unwrap_or(common::sync::DEFAULT_PARALLELISM);
    let verbose = if cli.verbose > 0 {
        cli.verbose
    } else {
        u8::from(file.settings.verbose)
    };
    Ok(Resolved {
        destination: Connection {
            address: destination_address.unwrap_or_else(|| source_address.clone()),
            token: destination_token,
        },
        source: Connection {
            address: source_address,
            token: source_token,
        },
        recursive: cli.recursive || file.settings.recursive,
        dry_run: cli.dry_run || file.settings.dry_run,
        overwrite: cli.overwrite || file.settings.overwrite,
        parallel,
        verbose,
    })
}

impl Resolved {
    /// Engine settings for copying `source_path` to `destination_path`.
    ///
    /// Paths on `secret`/`kv` mounts get the `data` marker added if it is missing.
    pub fn sync_settings(
        &self,
        source_path: &str,
        destination_path: &str,
        traversal_workers: usize,
    ) -> common::sync::Settings {
        common::sync::Settings {
            source_path: common::path::normalize_kv_path(source_path),
            destination_path: common::path::normalize_kv_path(destination_path),
            recursive: self.recursive,
            dry_run: self.dry_run,
            overwrite: self.overwrite,
            parallelism: self.parallel,
            traversal_workers,
        }
    }
}
