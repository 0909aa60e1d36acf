//! In-process lock manager and resolution tracker.
//!
//! Both hold a single mutex for every operation, which gives them the same
//! atomicity the Redis scripts provide. Lease expiry follows `tokio::time`, so
//! tests can drive it with a paused clock.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use fanout_common::{AppResult, IdGenerator};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::model::StatusId;
use crate::services::coordination::{
    DrainOutcome, LockAcquisition, LockHandle, LockManager, ResolutionTracker,
};

#[derive(Debug)]
struct Lease {
    token: String,
    expires_at: Instant,
}

/// Lock manager for a single process.
#[derive(Default)]
pub struct MemoryLockManager {
    leases: Mutex<HashMap<String, Lease>>,
    id_gen: IdGenerator,
}

impl MemoryLockManager {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone.
    pub async fn is_locked(&self, key: &str) -> bool {
        self.leases
            .lock()
            .await
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, key: &str, lease: Duration) -> AppResult<LockAcquisition> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if leases.get(key).is_some_and(|held| held.expires_at > now) {
            return Ok(LockAcquisition::Busy);
        }

        let token = self.id_gen.generate_token();
        leases.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                expires_at: now + lease,
            },
        );

        Ok(LockAcquisition::Acquired(LockHandle {
            key: key.to_string(),
            token,
            lease,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> AppResult<bool> {
        let mut leases = self.leases.lock().await;
        let owned = leases
            .get(&handle.key)
            .is_some_and(|held| held.token == handle.token && held.expires_at > Instant::now());
        if owned {
            leases.remove(&handle.key);
        }
        Ok(owned)
    }
}

#[derive(Debug, Default)]
struct Round {
    pending: BTreeSet<String>,
    resolved: BTreeSet<StatusId>,
}

/// Resolution tracker for a single process.
#[derive(Default)]
pub struct MemoryResolutionTracker {
    rounds: Mutex<HashMap<StatusId, Round>>,
}

impl MemoryResolutionTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResolutionTracker for MemoryResolutionTracker {
    async fn track(
        &self,
        status_id: StatusId,
        urls: &[String],
        baseline: &[StatusId],
    ) -> AppResult<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut rounds = self.rounds.lock().await;
        let round = rounds.entry(status_id).or_default();
        if round.pending.is_empty() {
            round.resolved = baseline.iter().copied().collect();
        }
        round.pending.extend(urls.iter().cloned());
        Ok(())
    }

    async fn finish(&self, status_id: StatusId, url: &str) -> AppResult<DrainOutcome> {
        let mut rounds = self.rounds.lock().await;

        let Some(round) = rounds.get_mut(&status_id) else {
            return Ok(DrainOutcome::NotPending);
        };
        if !round.pending.remove(url) {
            return Ok(DrainOutcome::NotPending);
        }
        if !round.pending.is_empty() {
            return Ok(DrainOutcome::Pending);
        }

        let baseline = rounds
            .remove(&status_id)
            .map(|round| round.resolved.into_iter().collect())
            .unwrap_or_default();
        Ok(DrainOutcome::Drained { baseline })
    }

    async fn pending(&self, status_id: StatusId) -> AppResult<Vec<String>> {
        Ok(self
            .rounds
            .lock()
            .await
            .get(&status_id)
            .map(|round| round.pending.iter().cloned().collect())
            .unwrap_or_default())
    }
}
