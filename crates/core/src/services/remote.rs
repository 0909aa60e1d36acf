//! Remote status fetching.
//!
//! [`HttpRemoteFetcher`] dereferences `ActivityPub` objects over HTTP and turns
//! them into [`RemoteStatus`] values. Visibility is derived from the `to`/`cc`
//! addressing the same way inbound activities are classified.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_common::config::FederationConfig;
use fanout_common::{AppError, AppResult};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::model::{AccountId, RemoteStatus, Visibility};

const ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";
const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";
const STATUS_TYPES: [&str; 4] = ["Note", "Question", "Article", "Page"];
/// Largest response body accepted for a single object.
pub const MAX_OBJECT_BYTES: usize = 1024 * 1024;

/// Error type for remote fetches.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The object does not exist (404/410, tombstone).
    #[error("Not found: {0}")]
    NotFound(String),
    /// The response is not a usable status.
    #[error("Invalid object: {0}")]
    Invalid(String),
    /// Transport error or unexpected response; worth retrying.
    #[error("Fetch failed: {0}")]
    Failed(String),
}

impl FetchError {
    /// Whether another attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Options of a single fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Local account the fetch is made for, when known.
    pub on_behalf_of: Option<AccountId>,
}

/// Fetches statuses from other servers.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Dereference `url` into a status.
    async fn fetch_status(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<RemoteStatus, FetchError>;
}

/// `ActivityPub` HTTP fetcher.
#[derive(Clone)]
pub struct HttpRemoteFetcher {
    client: Client,
    user_agent: String,
}

impl HttpRemoteFetcher {
    /// Create a new fetcher.
    pub fn new(config: &FederationConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .connect_timeout(Duration::from_secs(config.fetch_timeout_secs.min(10)))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: format!("{} (+https://{})", config.user_agent, config.local_domain),
        })
    }
}

#[async_trait]
impl RemoteFetcher for HttpRemoteFetcher {
    async fn fetch_status(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<RemoteStatus, FetchError> {
        let requested = Url::parse(url).map_err(|e| FetchError::Invalid(format!("{url}: {e}")))?;

        debug!(url, on_behalf_of = ?options.on_behalf_of, "Fetching remote status");

        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Failed(format!("{url} returned {status}")));
        }

        let body = read_limited(response, url).await?;
        let object: Value = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Invalid(format!("{url}: {e}")))?;
        let status = parse_status_object(&object)?;
        check_origin(&requested, &status)?;
        Ok(status)
    }
}

async fn read_limited(mut response: Response, url: &str) -> Result<Vec<u8>, FetchError> {
    if response
        .content_length()
        .is_some_and(|len| len > MAX_OBJECT_BYTES as u64)
    {
        return Err(too_large(url));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        append_limited(&mut body, &chunk, url)?;
    }
    Ok(body)
}

fn append_limited(body: &mut Vec<u8>, chunk: &[u8], url: &str) -> Result<(), FetchError> {
    if body.len() + chunk.len() > MAX_OBJECT_BYTES {
        return Err(too_large(url));
    }
    body.extend_from_slice(chunk);
    Ok(())
}

fn too_large(url: &str) -> FetchError {
    FetchError::Invalid(format!("{url}: body exceeds {MAX_OBJECT_BYTES} bytes"))
}

/// Reject a status whose id or author lives on another host than the URL it
/// was fetched from.
pub fn check_origin(requested: &Url, status: &RemoteStatus) -> Result<(), FetchError> {
    let host = requested.host_str();
    for uri in [&status.uri, &status.account_uri] {
        let same_host = Url::parse(uri).is_ok_and(|parsed| parsed.host_str() == host);
        if !same_host {
            return Err(FetchError::Invalid(format!(
                "{uri} does not belong to {}",
                host.unwrap_or_default()
            )));
        }
    }
    Ok(())
}

/// Convert an `ActivityPub` object into a [`RemoteStatus`].
pub fn parse_status_object(object: &Value) -> Result<RemoteStatus, FetchError> {
    let object_type = object.get("type").and_then(Value::as_str).unwrap_or_default();
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::Invalid("object has no id".to_string()))?;

    if object_type == "Tombstone" {
        return Err(FetchError::NotFound(format!("{id} is a tombstone")));
    }
    if !STATUS_TYPES.contains(&object_type) {
        return Err(FetchError::Invalid(format!("{id} has type {object_type:?}")));
    }

    let account_uri = first_id(object.get("attributedTo"))
        .ok_or_else(|| FetchError::Invalid(format!("{id} has no author")))?;

    let published = object
        .get("published")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

    let to = addresses(object.get("to"));
    let cc = addresses(object.get("cc"));

    Ok(RemoteStatus {
        uri: id.to_string(),
        url: first_url(object.get("url")),
        account_uri,
        visibility: visibility_from_addressing(&to, &cc),
        text: object
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        published,
    })
}

/// Classify addressing: public in `to`, public in `cc`, a followers
/// collection, or individual recipients only.
#[must_use]
pub fn visibility_from_addressing(to: &[String], cc: &[String]) -> Visibility {
    let is_public = |s: &String| s == PUBLIC_COLLECTION || s == "as:Public" || s == "Public";

    if to.iter().any(is_public) {
        Visibility::Public
    } else if cc.iter().any(is_public) {
        Visibility::Unlisted
    } else if to.iter().chain(cc).any(|s| s.ends_with("/followers")) {
        Visibility::Private
    } else {
        Visibility::Direct
    }
}

fn addresses(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| first_id(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

fn first_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(ToString::to_string),
        Value::Array(items) => items.iter().find_map(|item| first_id(Some(item))),
        _ => None,
    }
}

fn first_url(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("href").and_then(Value::as_str).map(ToString::to_string),
        Value::Array(items) => items.iter().find_map(|item| first_url(Some(item))),
        _ => None,
    }
}
