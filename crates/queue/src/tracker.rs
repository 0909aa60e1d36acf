//! Redis pending-resolution sets.
//!
//! `pending:<status>` holds outstanding reference URLs and `resolved:<status>`
//! the reference IDs linked when the round started. Draining is a single
//! script: the `SREM` that empties the pending set also reads and deletes
//! both sets, so exactly one caller observes the drain.

use async_trait::async_trait;
use fanout_common::{AppError, AppResult};
use fanout_core::{DrainOutcome, ResolutionTracker, StatusId};
use fred::clients::Client;
use fred::interfaces::{LuaInterface, SetsInterface};

use crate::keys::RedisKeys;

// KEYS: pending, resolved. ARGV: url_count, urls..., baseline ids...
const TRACK_SCRIPT: &str = r"
local n = tonumber(ARGV[1])
if redis.call('SCARD', KEYS[1]) == 0 then
  redis.call('DEL', KEYS[2])
  for i = n + 2, #ARGV do
    redis.call('SADD', KEYS[2], ARGV[i])
  end
end
for i = 2, n + 1 do
  redis.call('SADD', KEYS[1], ARGV[i])
end
return 1
";

// KEYS: pending, resolved. ARGV: url.
const FINISH_SCRIPT: &str = r"
if redis.call('SREM', KEYS[1], ARGV[1]) == 0 then
  return {'not_pending'}
end
if redis.call('SCARD', KEYS[1]) > 0 then
  return {'pending'}
end
local resolved = redis.call('SMEMBERS', KEYS[2])
redis.call('DEL', KEYS[1], KEYS[2])
table.insert(resolved, 1, 'drained')
return resolved
";

/// Resolution tracker stored in Redis sets.
#[derive(Clone)]
pub struct RedisResolutionTracker {
    client: Client,
    keys: RedisKeys,
}

impl RedisResolutionTracker {
    /// Create a tracker over an initialized client.
    #[must_use]
    pub const fn new(client: Client, keys: RedisKeys) -> Self {
        Self { client, keys }
    }
}

#[async_trait]
impl ResolutionTracker for RedisResolutionTracker {
    async fn track(
        &self,
        status_id: StatusId,
        urls: &[String],
        baseline: &[StatusId],
    ) -> AppResult<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut args = Vec::with_capacity(1 + urls.len() + baseline.len());
        args.push(urls.len().to_string());
        args.extend(urls.iter().cloned());
        args.extend(baseline.iter().map(ToString::to_string));

        let _: i64 = self
            .client
            .eval(
                TRACK_SCRIPT,
                vec![self.keys.pending(status_id), self.keys.resolved(status_id)],
                args,
            )
            .await?;
        Ok(())
    }

    async fn finish(&self, status_id: StatusId, url: &str) -> AppResult<DrainOutcome> {
        let reply: Vec<String> = self
            .client
            .eval(
                FINISH_SCRIPT,
                vec![self.keys.pending(status_id), self.keys.resolved(status_id)],
                vec![url.to_string()],
            )
            .await?;

        match reply.split_first() {
            Some((tag, _)) if tag == "not_pending" => Ok(DrainOutcome::NotPending),
            Some((tag, _)) if tag == "pending" => Ok(DrainOutcome::Pending),
            Some((tag, ids)) if tag == "drained" => {
                let mut baseline = ids
                    .iter()
                    .map(|id| {
                        id.parse::<StatusId>()
                            .map_err(|e| AppError::Serialization(format!("resolved id {id}: {e}")))
                    })
                    .collect::<AppResult<Vec<_>>>()?;
                baseline.sort_unstable();
                Ok(DrainOutcome::Drained { baseline })
            }
            _ => Err(AppError::Redis(format!("unexpected finish reply: {reply:?}"))),
        }
    }

    async fn pending(&self, status_id: StatusId) -> AppResult<Vec<String>> {
        let mut urls: Vec<String> = self.client.smembers(self.keys.pending(status_id)).await?;
        urls.sort_unstable();
        Ok(urls)
    }
}
