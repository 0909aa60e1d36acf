//! Timeline storage interface.

use async_trait::async_trait;
use fanout_common::AppResult;

use crate::model::{AccountId, StatusId};

/// Feed storage. Pushing a status that is already present is a no-op.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Add a status to an account's home feed.
    async fn push_home(&self, account_id: AccountId, status_id: StatusId) -> AppResult<()>;

    /// Add a status to the public timeline, and to the local one when `local`.
    async fn push_public(&self, status_id: StatusId, local: bool) -> AppResult<()>;
}

/// A no-op implementation for deployments without feeds.
#[derive(Clone, Default)]
pub struct NoOpTimelineStore;

#[async_trait]
impl TimelineStore for NoOpTimelineStore {
    async fn push_home(&self, _account_id: AccountId, _status_id: StatusId) -> AppResult<()> {
        Ok(())
    }

    async fn push_public(&self, _status_id: StatusId, _local: bool) -> AppResult<()> {
        Ok(())
    }
}
