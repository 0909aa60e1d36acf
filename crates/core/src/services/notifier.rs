//! Notification interface.

use async_trait::async_trait;
use fanout_common::AppResult;
use serde_json::Value;

use crate::model::AccountId;

/// Delivers user-facing notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify `account_id` of an event.
    async fn notify(
        &self,
        account_id: AccountId,
        event_type: &str,
        payload: Value,
    ) -> AppResult<()>;
}

/// A no-op implementation of Notifier for testing or when notifications are disabled.
#[derive(Clone, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn notify(
        &self,
        _account_id: AccountId,
        _event_type: &str,
        _payload: Value,
    ) -> AppResult<()> {
        Ok(())
    }
}
