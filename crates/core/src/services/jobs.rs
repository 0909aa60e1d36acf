//! Job submission interface.
//!
//! Services enqueue follow-up work through [`JobSubmitter`]. The queue-backed
//! implementation lives in the queue crate.

use std::fmt;

use async_trait::async_trait;
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use crate::model::{AccountId, EmojiId, StatusId};

/// One destination of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// A local account's home feed and stream.
    Home {
        /// Feed owner.
        account_id: AccountId,
    },
    /// The public timeline (and the local one for local statuses).
    Public,
    /// The search index.
    Search,
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home { account_id } => write!(f, "home:{account_id}"),
            Self::Public => f.write_str("public"),
            Self::Search => f.write_str("search"),
        }
    }
}

/// Options of a distribution job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionOptions {
    /// Republish of an already distributed status: stream `status.update` and
    /// re-index only.
    #[serde(default)]
    pub update: bool,
    /// Whether the materialized references differ from the snapshot taken when
    /// resolution started.
    #[serde(default)]
    pub references_changed: bool,
    /// Restrict delivery to these targets. Used when retrying failed targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<DeliveryTarget>>,
}

impl DistributionOptions {
    /// Options of a republish after reference resolution.
    #[must_use]
    pub const fn republish(references_changed: bool) -> Self {
        Self {
            update: true,
            references_changed,
            targets: None,
        }
    }

    /// Same mode, restricted to one target.
    #[must_use]
    pub fn scoped_to(&self, target: DeliveryTarget) -> Self {
        Self {
            update: self.update,
            references_changed: self.references_changed,
            targets: Some(vec![target]),
        }
    }
}

/// Options of a reference resolution job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Only consult local storage; never fetch.
    #[serde(default)]
    pub local_only: bool,
}

/// Enqueues pipeline jobs.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Queue a fan-out of `status_id`. Returns the job ID.
    async fn submit_distribution(
        &self,
        status_id: StatusId,
        options: DistributionOptions,
    ) -> AppResult<String>;

    /// Queue resolution of one reference URL.
    async fn submit_reference_resolution(
        &self,
        status_id: StatusId,
        reference_url: &str,
        options: ResolveOptions,
    ) -> AppResult<String>;

    /// Queue a reaction cache refresh for statuses using these emojis.
    async fn submit_cache_invalidation(&self, emoji_ids: Vec<EmojiId>) -> AppResult<String>;
}
