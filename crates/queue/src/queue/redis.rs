//! Redis-backed job queue.
//!
//! Each state transition is one Lua script, so concurrent workers and
//! schedulers on any number of nodes never observe a half-moved job.

use async_trait::async_trait;
use chrono::Utc;
use fanout_common::{AppError, AppResult, IdGenerator};
use fred::clients::Client;
use fred::interfaces::{ListInterface, LuaInterface};
use tracing::{debug, warn};

use super::{Enqueued, FailOutcome, JobQueue, QueueSettings, STALLED_ERROR, failed_copy};
use crate::job::{EnqueueOptions, Job, JobEnvelope, Lane};
use crate::keys::RedisKeys;
use crate::retry::DeadLetterEntry;

// KEYS: ready, job, unique. ARGV: id, envelope, has_unique.
const ENQUEUE_SCRIPT: &str = r"
if ARGV[3] == '1' then
  local existing = redis.call('GET', KEYS[3])
  if existing then
    return {'dup', existing}
  end
  redis.call('SET', KEYS[3], ARGV[1])
end
redis.call('HSET', KEYS[2], 'envelope', ARGV[2])
redis.call('LPUSH', KEYS[1], ARGV[1])
return {'new', ARGV[1]}
";

// KEYS: ready, inflight. ARGV: deadline_ms, lease, job key prefix.
const DEQUEUE_SCRIPT: &str = r"
while true do
  local id = redis.call('RPOP', KEYS[1])
  if not id then
    return nil
  end
  local key = ARGV[3] .. id
  local envelope = redis.call('HGET', key, 'envelope')
  if envelope then
    redis.call('HSET', key, 'lease', ARGV[2])
    redis.call('ZADD', KEYS[2], ARGV[1], id)
    return envelope
  end
end
";

// KEYS: inflight, job, unique. ARGV: id, lease, has_unique.
const ACK_SCRIPT: &str = r"
if redis.call('HGET', KEYS[2], 'lease') ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[2])
if ARGV[3] == '1' and redis.call('GET', KEYS[3]) == ARGV[1] then
  redis.call('DEL', KEYS[3])
end
return 1
";

// KEYS: inflight, job, retry. ARGV: id, lease, envelope, due_ms.
const RETRY_SCRIPT: &str = r"
if redis.call('HGET', KEYS[2], 'lease') ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[2], 'envelope', ARGV[3])
redis.call('HDEL', KEYS[2], 'lease')
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
return 1
";

// KEYS: inflight, job, unique, dead. ARGV: id, lease, has_unique, entry, dead_max.
const BURY_SCRIPT: &str = r"
if redis.call('HGET', KEYS[2], 'lease') ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[2])
if ARGV[3] == '1' and redis.call('GET', KEYS[3]) == ARGV[1] then
  redis.call('DEL', KEYS[3])
end
redis.call('LPUSH', KEYS[4], ARGV[4])
redis.call('LTRIM', KEYS[4], 0, tonumber(ARGV[5]) - 1)
return 1
";

// KEYS: retry, ready. ARGV: now_ms.
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('LPUSH', KEYS[2], id)
end
return #due
";

// KEYS: inflight. ARGV: now_ms, job key prefix. Returns id, envelope, lease triples.
const STALLED_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local out = {}
for _, id in ipairs(expired) do
  local key = ARGV[2] .. id
  local envelope = redis.call('HGET', key, 'envelope')
  if envelope then
    table.insert(out, id)
    table.insert(out, envelope)
    table.insert(out, redis.call('HGET', key, 'lease') or '')
  else
    redis.call('ZREM', KEYS[1], id)
  end
end
return out
";

/// Job queue stored in Redis.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: Client,
    keys: RedisKeys,
    settings: QueueSettings,
    id_gen: IdGenerator,
}

impl RedisJobQueue {
    /// Create a queue over an initialized client.
    #[must_use]
    pub fn new(client: Client, keys: RedisKeys, settings: QueueSettings) -> Self {
        Self {
            client,
            keys,
            settings,
            id_gen: IdGenerator::new(),
        }
    }

    fn unique_args(&self, envelope: &JobEnvelope) -> (String, &'static str) {
        envelope.uniqueness_key.as_deref().map_or_else(
            || (self.keys.unique(""), "0"),
            |key| (self.keys.unique(key), "1"),
        )
    }

    fn lease_of(envelope: &JobEnvelope) -> AppResult<&str> {
        envelope
            .lease
            .as_deref()
            .ok_or_else(|| AppError::Queue(format!("job {} was not dequeued", envelope.id)))
    }

    async fn bury_failed(&self, failed: JobEnvelope, lease: &str) -> AppResult<bool> {
        let (unique_key, has_unique) = self.unique_args(&failed);
        let entry = DeadLetterEntry::new(
            failed.id.clone(),
            failed.job.clone(),
            failed.attempts,
            failed.last_error.clone().unwrap_or_default(),
        );
        let entry = serde_json::to_string(&entry)?;

        let buried: i64 = self
            .client
            .eval(
                BURY_SCRIPT,
                vec![
                    self.keys.inflight(failed.lane),
                    self.keys.job(&failed.id),
                    unique_key,
                    self.keys.dead(),
                ],
                vec![
                    failed.id.clone(),
                    lease.to_string(),
                    has_unique.to_string(),
                    entry,
                    self.settings.dead_letter_max.to_string(),
                ],
            )
            .await?;
        Ok(buried == 1)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job, options: EnqueueOptions) -> AppResult<Enqueued> {
        let id = self.id_gen.generate();
        let envelope = JobEnvelope::new(id.clone(), job, options);
        let (unique_key, has_unique) = self.unique_args(&envelope);
        let payload = serde_json::to_string(&envelope)?;

        let reply: Vec<String> = self
            .client
            .eval(
                ENQUEUE_SCRIPT,
                vec![self.keys.ready(envelope.lane), self.keys.job(&id), unique_key],
                vec![id, payload, has_unique.to_string()],
            )
            .await?;

        match reply.as_slice() {
            [status, id] => Ok(Enqueued {
                id: id.clone(),
                duplicate: status == "dup",
            }),
            _ => Err(AppError::Queue(format!("unexpected enqueue reply: {reply:?}"))),
        }
    }

    async fn dequeue(&self, lane: Lane) -> AppResult<Option<JobEnvelope>> {
        let deadline = Utc::now().timestamp_millis()
            + self.settings.execution_timeout.as_millis() as i64;
        let lease = self.id_gen.generate_token();

        let payload: Option<String> = self
            .client
            .eval(
                DEQUEUE_SCRIPT,
                vec![self.keys.ready(lane), self.keys.inflight(lane)],
                vec![deadline.to_string(), lease.clone(), self.keys.job_prefix()],
            )
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        let mut envelope: JobEnvelope = serde_json::from_str(&payload)?;
        envelope.lease = Some(lease);
        Ok(Some(envelope))
    }

    async fn ack(&self, envelope: &JobEnvelope) -> AppResult<bool> {
        let lease = Self::lease_of(envelope)?;
        let (unique_key, has_unique) = self.unique_args(envelope);

        let acked: i64 = self
            .client
            .eval(
                ACK_SCRIPT,
                vec![
                    self.keys.inflight(envelope.lane),
                    self.keys.job(&envelope.id),
                    unique_key,
                ],
                vec![envelope.id.clone(), lease.to_string(), has_unique.to_string()],
            )
            .await?;
        Ok(acked == 1)
    }

    async fn fail(&self, envelope: &JobEnvelope, error: &str) -> AppResult<FailOutcome> {
        let lease = Self::lease_of(envelope)?;
        let failed = failed_copy(envelope, error);

        if failed.attempts > failed.max_retries {
            return Ok(if self.bury_failed(failed, lease).await? {
                FailOutcome::Dead
            } else {
                FailOutcome::Stale
            });
        }

        let attempt = failed.attempts;
        let delay = self.settings.retry.delay_for_attempt(attempt);
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let retried: i64 = self
            .client
            .eval(
                RETRY_SCRIPT,
                vec![
                    self.keys.inflight(failed.lane),
                    self.keys.job(&failed.id),
                    self.keys.retry(failed.lane),
                ],
                vec![
                    failed.id.clone(),
                    lease.to_string(),
                    serde_json::to_string(&failed)?,
                    due.to_string(),
                ],
            )
            .await?;

        Ok(if retried == 1 {
            FailOutcome::Retrying { attempt, delay }
        } else {
            FailOutcome::Stale
        })
    }

    async fn bury(&self, envelope: &JobEnvelope, error: &str) -> AppResult<bool> {
        let lease = Self::lease_of(envelope)?;
        self.bury_failed(failed_copy(envelope, error), lease).await
    }

    async fn promote_due(&self, lane: Lane) -> AppResult<usize> {
        let promoted: i64 = self
            .client
            .eval(
                PROMOTE_SCRIPT,
                vec![self.keys.retry(lane), self.keys.ready(lane)],
                vec![Utc::now().timestamp_millis().to_string()],
            )
            .await?;
        Ok(promoted as usize)
    }

    async fn reap_stalled(&self, lane: Lane) -> AppResult<Vec<(JobEnvelope, FailOutcome)>> {
        let stalled: Vec<String> = self
            .client
            .eval(
                STALLED_SCRIPT,
                vec![self.keys.inflight(lane)],
                vec![
                    Utc::now().timestamp_millis().to_string(),
                    self.keys.job_prefix(),
                ],
            )
            .await?;

        let mut outcomes = Vec::new();
        for triple in stalled.chunks_exact(3) {
            let [id, payload, lease] = triple else {
                continue;
            };
            let mut envelope: JobEnvelope = match serde_json::from_str(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Unreadable stalled job");
                    continue;
                }
            };
            envelope.lease = Some(lease.clone());
            debug!(job_id = %id, lane = %lane, "Reaping stalled job");
            let outcome = self.fail(&envelope, STALLED_ERROR).await?;
            outcomes.push((envelope, outcome));
        }
        Ok(outcomes)
    }

    async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry<Job>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let entries: Vec<String> = self
            .client
            .lrange(self.keys.dead(), 0, limit as i64 - 1)
            .await?;

        entries
            .iter()
            .map(|entry| serde_json::from_str(entry).map_err(AppError::from))
            .collect()
    }

    async fn ready_count(&self, lane: Lane) -> AppResult<usize> {
        let len: i64 = self.client.llen(self.keys.ready(lane)).await?;
        Ok(len as usize)
    }
}
