//! [`SecretStore`] over the Vault HTTP API
//!
//! Versioned (KV v2) engines keep values under `<mount>/data/...` and list keys under
//! `<mount>/metadata/...`; both layouts are handled based on the `data` marker in the path. Every
//! request is subject to the limits configured in the `throttle` crate.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeSet;

use crate::path;
use crate::secret::{Secret, SecretData};
use crate::store::SecretStore;

const TOKEN_HEADER: &str = "X-Vault-Token";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
// active, standby, DR secondary and performance standby
const HEALTHY_STATUSES: [u16; 4] = [200, 429, 472, 473];

#[derive(serde::Deserialize)]
struct Response<T> {
    data: Option<T>,
}

#[derive(serde::Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

/// Path used to list the keys below `path`.
///
/// Versioned engines only list through the metadata endpoint, so the first `data` segment is
/// swapped for `metadata`.
fn list_path(path: &str) -> String {
    let path = format!("{}/", path.trim_matches('/'));
    path.replacen("/data/", "/metadata/", 1)
}

/// Decode the `data` member of a read response.
fn parse_secret(path: &str, payload: serde_json::Value) -> Result<Option<Secret>> {
    let serde_json::Value::Object(mut payload) = payload else {
        bail!("unexpected payload for {path:?}: {payload}");
    };
    let versioned = match payload.remove("data") {
        Some(serde_json::Value::Object(data)) => Some(data),
        // deleted or destroyed version
        Some(serde_json::Value::Null) if payload.contains_key("metadata") => return Ok(None),
        Some(other) => {
            payload.insert("data".to_string(), other);
            None
        }
        None => None,
    };
    let secret = match versioned {
        Some(data) => {
            let metadata = match payload.remove("metadata") {
                Some(metadata @ serde_json::Value::Object(_)) => Some(
                    serde_json::from_value::<SecretData>(metadata)
                        .with_context(|| format!("invalid metadata for {path:?}"))?,
                ),
                _ => None,
            };
            Secret {
                path: path.to_string(),
                data: serde_json::from_value(serde_json::Value::Object(data))
                    .with_context(|| format!("invalid secret data for {path:?}"))?,
                metadata,
            }
        }
        None => Secret::new(
            path,
            serde_json::from_value(serde_json::Value::Object(payload))
                .with_context(|| format!("invalid secret data for {path:?}"))?,
        ),
    };
    Ok(Some(secret))
}

/// Map the response to a read of `path`, a missing secret is `None`.
fn parse_read(path: &str, status: StatusCode, body: &str) -> Result<Option<Secret>> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(status_error(&format!("reading {path:?}"), status, body));
    }
    let response: Response<serde_json::Value> = serde_json::from_str(body)
        .with_context(|| format!("failed decoding response for {path:?}"))?;
    match response.data {
        Some(payload) => parse_secret(path, payload),
        None => Ok(None),
    }
}

/// Map the response to a list of `path` to the names of its children.
fn parse_listing(path: &str, status: StatusCode, body: &str) -> Result<Vec<String>> {
    if matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::METHOD_NOT_ALLOWED
    ) {
        tracing::trace!("{:?} is not a directory ({})", path, status);
        return Ok(vec![]);
    }
    if !status.is_success() {
        return Err(status_error(&format!("listing {path:?}"), status, body));
    }
    let response: Response<ListData> = serde_json::from_str(body)
        .with_context(|| format!("failed decoding listing of {path:?}"))?;
    // a path holding a value and children is listed twice, as `name` and `name/`
    let children: BTreeSet<String> = response
        .data
        .map(|data| data.keys)
        .unwrap_or_default()
        .into_iter()
        .map(|key| key.trim_end_matches('/').to_string())
        .filter(|key| !key.is_empty())
        .collect();
    Ok(children.into_iter().collect())
}

/// Body of a write request, versioned engines expect the payload wrapped in `data`.
fn write_body(path: &str, data: &SecretData) -> Result<serde_json::Value> {
    let data = serde_json::to_value(data)?;
    if path::has_data_marker(path) {
        return Ok(serde_json::json!({ "data": data }));
    }
    Ok(data)
}

fn status_error(what: &str, status: StatusCode, body: &str) -> anyhow::Error {
    let error = anyhow!("{what} failed with HTTP status {status}");
    if body.is_empty() {
        return error;
    }
    error.context(format!("error message body:\n{body}"))
}

pub struct VaultClient {
    name: String,
    address: String,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Create a client and check that the server at `address` is up.
    #[tracing::instrument(skip(token))]
    pub async fn connect(name: &str, address: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed building HTTP client")?;
        let client = Self {
            name: name.to_string(),
            address: address.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        };
        let (status, body) = client
            .execute(client.http.get(client.url("sys/health")))
            .await
            .with_context(|| format!("failed connecting to {name} Vault at {address}"))?;
        if !HEALTHY_STATUSES.contains(&status.as_u16()) {
            return Err(status_error(
                &format!("health check of {name} Vault at {address}"),
                status,
                &body,
            ));
        }
        tracing::info!("connected to {} Vault at {}", name, address);
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        throttle::get_ops_token().await;
        let _permit = throttle::request_permit().await;
        let response = request.header(TOKEN_HEADER, &self.token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_secret(&self, path: &str) -> Result<Option<Secret>> {
        tracing::debug!("reading {:?} from {}", path, self.name);
        let (status, body) = self
            .execute(self.http.get(self.url(path)))
            .await
            .with_context(|| format!("failed reading {path:?}"))?;
        parse_read(path.trim_matches('/'), status, &body)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let list_path = list_path(path);
        tracing::debug!("listing {:?} in {}", list_path, self.name);
        let (status, body) = self
            .execute(self.http.get(format!("{}?list=true", self.url(&list_path))))
            .await
            .with_context(|| format!("failed listing {path:?}"))?;
        parse_listing(path, status, &body)
    }

    async fn write_secret(&self, path: &str, data: &SecretData) -> Result<()> {
        tracing::debug!("writing {:?} to {}", path, self.name);
        let body = write_body(path, data)?;
        let (status, response) = self
            .execute(self.http.post(self.url(path)).json(&body))
            .await
            .with_context(|| format!("failed writing {path:?}"))?;
        if !status.is_success() {
            return Err(status_error(&format!("writing {path:?}"), status, &response));
        }
        Ok(())
    }
}
