//! Search indexing with optional Meilisearch integration.
//!
//! Indexing can be disabled entirely, in which case [`NoOpSearchIndexer`] is
//! wired in and the dispatcher never computes a search target.

use async_trait::async_trait;
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

#[cfg(feature = "meilisearch")]
use fanout_common::AppError;
#[cfg(feature = "meilisearch")]
use meilisearch_sdk::client::Client as MeilisearchClient;
#[cfg(feature = "meilisearch")]
use tracing::{debug, info};

use crate::model::Status;

/// Document representing a status in the search index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    /// Status ID (primary key)
    pub id: i64,
    /// Account ID of the author
    pub account_id: i64,
    /// Status text content
    pub text: String,
    /// Visibility level
    pub visibility: String,
    /// Creation timestamp (Unix epoch seconds)
    pub created_at: i64,
    /// Last update timestamp (Unix epoch seconds)
    pub updated_at: i64,
}

impl From<&Status> for StatusDocument {
    fn from(status: &Status) -> Self {
        Self {
            id: status.id,
            account_id: status.account_id,
            text: status.text.clone(),
            visibility: status.visibility.to_string(),
            created_at: status.created_at.timestamp(),
            updated_at: status.updated_at.timestamp(),
        }
    }
}

/// Search index writer.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Whether indexing is configured at all.
    fn is_enabled(&self) -> bool;

    /// Add or replace the document of a status.
    async fn index_status(&self, status: &Status) -> AppResult<()>;
}

/// Indexer used when search is disabled.
#[derive(Clone, Default)]
pub struct NoOpSearchIndexer;

#[async_trait]
impl SearchIndexer for NoOpSearchIndexer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn index_status(&self, _status: &Status) -> AppResult<()> {
        Ok(())
    }
}

/// Meilisearch backed indexer.
#[cfg(feature = "meilisearch")]
pub struct MeilisearchIndexer {
    client: MeilisearchClient,
}

#[cfg(feature = "meilisearch")]
impl MeilisearchIndexer {
    /// Index name for statuses.
    pub const STATUSES_INDEX: &'static str = "statuses";

    /// Create an indexer for a Meilisearch host.
    pub fn new(url: &str, api_key: Option<String>) -> AppResult<Self> {
        let client = MeilisearchClient::new(url, api_key)
            .map_err(|e| AppError::Config(format!("Failed to create Meilisearch client: {e}")))?;
        info!(url = %url, "Meilisearch client initialized");
        Ok(Self { client })
    }
}

#[cfg(feature = "meilisearch")]
#[async_trait]
impl SearchIndexer for MeilisearchIndexer {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn index_status(&self, status: &Status) -> AppResult<()> {
        let doc = StatusDocument::from(status);
        self.client
            .index(Self::STATUSES_INDEX)
            .add_documents(&[doc], Some("id"))
            .await
            .map_err(|e| AppError::Internal(format!("Failed to index status: {e}")))?;

        debug!(status_id = status.id, "Indexed status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Visibility;
    use chrono::Utc;

    #[test]
    fn test_status_document_from_status() {
        let now = Utc::now();
        let status = Status {
            id: 42,
            account_id: 1,
            local: true,
            visibility: Visibility::Unlisted,
            uri: "https://local.test/statuses/42".to_string(),
            url: None,
            text: "Hello world".to_string(),
            mentioned_account_ids: vec![],
            reference_urls: vec![],
            created_at: now,
            updated_at: now,
        };

        let doc = StatusDocument::from(&status);
        assert_eq!(doc.visibility, "unlisted");

        let json = serde_json::to_string(&doc).expect("serialization should succeed");
        assert!(json.contains("\"accountId\":1"));
    }

    #[test]
    fn test_noop_is_disabled() {
        assert!(!NoOpSearchIndexer.is_enabled());
    }
}
