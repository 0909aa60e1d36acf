//! Redis Pub/Sub for streaming events.
//!
//! Streaming gateways on any instance subscribe to `{prefix}:timeline:*`
//! channels and forward the JSON payloads to connected clients.

use async_trait::async_trait;
use fanout_common::AppResult;
use fanout_core::{AccountId, EventPublisher, Notifier, StreamChannel, StreamEvent};
use fred::clients::Client;
use fred::interfaces::PubsubInterface;
use serde_json::Value;
use tracing::debug;

use crate::keys::RedisKeys;

/// Publishes stream events and notifications over Redis Pub/Sub.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    keys: RedisKeys,
}

impl RedisPubSub {
    /// Create a publisher over an initialized client.
    #[must_use]
    pub const fn new(publisher: Client, keys: RedisKeys) -> Self {
        Self { publisher, keys }
    }

    /// Redis channel name of a stream channel.
    #[must_use]
    pub fn channel_name(&self, channel: StreamChannel) -> String {
        self.keys.key(&channel.to_string())
    }
}

#[async_trait]
impl EventPublisher for RedisPubSub {
    async fn publish(&self, channel: StreamChannel, event: &StreamEvent) -> AppResult<()> {
        let name = self.channel_name(channel);
        let payload = serde_json::to_string(event)?;

        let _: () = self.publisher.publish(&name, payload).await?;
        debug!(channel = %name, "Published stream event");
        Ok(())
    }
}

#[async_trait]
impl Notifier for RedisPubSub {
    async fn notify(
        &self,
        account_id: AccountId,
        event_type: &str,
        payload: Value,
    ) -> AppResult<()> {
        let event = StreamEvent::Notification {
            account_id,
            notification_type: event_type.to_string(),
            payload,
        };
        self.publish(StreamChannel::Home(account_id), &event).await
    }
}
