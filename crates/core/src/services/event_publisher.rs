//! Event publisher service.
//!
//! Provides an abstraction for publishing real-time events.
//! The actual implementation is provided by the queue crate (Redis Pub/Sub).

use async_trait::async_trait;
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::model::{AccountId, StatusId, Visibility};

/// Streaming channel a subscriber listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    /// One account's home stream.
    Home(AccountId),
    /// Federated public stream.
    Public,
    /// Local-only public stream.
    LocalPublic,
}

impl fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home(account_id) => write!(f, "timeline:{account_id}"),
            Self::Public => f.write_str("timeline:public"),
            Self::LocalPublic => f.write_str("timeline:public:local"),
        }
    }
}

/// Event types for real-time updates.
///
/// Serialized as `{"event": ..., "payload": {...}}`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum StreamEvent {
    /// A status entered a timeline.
    #[serde(rename = "update")]
    StatusCreated {
        status_id: StatusId,
        account_id: AccountId,
        visibility: Visibility,
    },
    /// A status already on the timeline changed.
    #[serde(rename = "status.update")]
    StatusUpdated {
        status_id: StatusId,
        account_id: AccountId,
        references_changed: bool,
    },
    /// A notification for the stream owner.
    #[serde(rename = "notification")]
    Notification {
        account_id: AccountId,
        notification_type: String,
        payload: Value,
    },
}

/// Trait for publishing real-time events.
///
/// This allows the core services to publish events
/// without directly depending on the queue/pubsub implementation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on a channel.
    async fn publish(&self, channel: StreamChannel, event: &StreamEvent) -> AppResult<()>;
}

/// A no-op implementation of EventPublisher for testing or when real-time events are disabled.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _channel: StreamChannel, _event: &StreamEvent) -> AppResult<()> {
        Ok(())
    }
}
