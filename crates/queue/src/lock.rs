//! Redis lease locks.

use std::time::Duration;

use async_trait::async_trait;
use fanout_common::{AppResult, IdGenerator};
use fanout_core::{LockAcquisition, LockHandle, LockManager};
use fred::clients::Client;
use fred::interfaces::{KeysInterface, LuaInterface};
use fred::types::{Expiration, SetOptions};
use tracing::debug;

use crate::keys::RedisKeys;

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Lock manager using `SET NX PX` and a compare-and-delete release.
#[derive(Clone)]
pub struct RedisLockManager {
    client: Client,
    keys: RedisKeys,
    id_gen: IdGenerator,
}

impl RedisLockManager {
    /// Create a lock manager over an initialized client.
    #[must_use]
    pub fn new(client: Client, keys: RedisKeys) -> Self {
        Self {
            client,
            keys,
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, key: &str, lease: Duration) -> AppResult<LockAcquisition> {
        let token = self.id_gen.generate_token();

        // NX returns None if the key already exists, Some("OK") if set
        let result: Option<String> = self
            .client
            .set(
                self.keys.key(key),
                token.clone(),
                Some(Expiration::PX(lease.as_millis().max(1) as i64)),
                Some(SetOptions::NX),
                false,
            )
            .await?;

        if result.is_none() {
            debug!(key, "Lock busy");
            return Ok(LockAcquisition::Busy);
        }

        Ok(LockAcquisition::Acquired(LockHandle {
            key: key.to_string(),
            token,
            lease,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> AppResult<bool> {
        let deleted: i64 = self
            .client
            .eval(
                RELEASE_SCRIPT,
                vec![self.keys.key(&handle.key)],
                vec![handle.token.clone()],
            )
            .await?;
        Ok(deleted == 1)
    }
}
