//! Redis feeds.

use async_trait::async_trait;
use fanout_common::AppResult;
use fanout_core::{AccountId, StatusId, TimelineStore};
use fred::clients::Client;
use fred::interfaces::LuaInterface;

use crate::keys::RedisKeys;

// KEYS: feed. ARGV: status id, max entries.
const PUSH_SCRIPT: &str = r"
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[1])
redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -(tonumber(ARGV[2]) + 1))
return 1
";

/// Feeds kept as sorted sets scored by status ID, trimmed to the newest
/// `max_entries`.
#[derive(Clone)]
pub struct RedisTimelineStore {
    client: Client,
    keys: RedisKeys,
    max_entries: usize,
}

impl RedisTimelineStore {
    /// Create a timeline store over an initialized client.
    #[must_use]
    pub const fn new(client: Client, keys: RedisKeys, max_entries: usize) -> Self {
        Self {
            client,
            keys,
            max_entries,
        }
    }

    async fn push(&self, feed: String, status_id: StatusId) -> AppResult<()> {
        let _: i64 = self
            .client
            .eval(
                PUSH_SCRIPT,
                vec![feed],
                vec![status_id.to_string(), self.max_entries.max(1).to_string()],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TimelineStore for RedisTimelineStore {
    async fn push_home(&self, account_id: AccountId, status_id: StatusId) -> AppResult<()> {
        self.push(self.keys.home_feed(account_id), status_id).await
    }

    async fn push_public(&self, status_id: StatusId, local: bool) -> AppResult<()> {
        self.push(self.keys.public_timeline(false), status_id).await?;
        if local {
            self.push(self.keys.public_timeline(true), status_id).await?;
        }
        Ok(())
    }
}
