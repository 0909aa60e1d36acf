//! Cross-worker coordination primitives.
//!
//! Both traits are backed by the shared key-value store in production; every
//! mutation must be a single atomic round trip.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use fanout_common::AppResult;

use crate::model::StatusId;

/// Build a lock key of the form `lock:<resource>:<id>`.
#[must_use]
pub fn lock_key(resource: &str, id: impl Display) -> String {
    format!("lock:{resource}:{id}")
}

/// Proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Lock key.
    pub key: String,
    /// Holder token; release only succeeds while it still matches.
    pub token: String,
    /// Lease the lock was taken with.
    pub lease: Duration,
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The caller now owns the lock.
    Acquired(LockHandle),
    /// Another holder owns a live lease.
    Busy,
}

/// Lease-based mutual exclusion keyed by resource.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take `key` for `lease`. Never waits.
    async fn acquire(&self, key: &str, lease: Duration) -> AppResult<LockAcquisition>;

    /// Release a lock if `handle` still owns it.
    ///
    /// Returns `false` when the lease already expired (and possibly passed to
    /// another holder).
    async fn release(&self, handle: &LockHandle) -> AppResult<bool>;
}

/// Result of removing one URL from a pending-resolution set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Other URLs are still outstanding.
    Pending,
    /// This removal emptied the set. Both sets were cleared and `baseline`
    /// holds the reference IDs that were materialized when the round started.
    Drained {
        /// Snapshot taken by [`ResolutionTracker::track`].
        baseline: Vec<StatusId>,
    },
    /// The URL was not pending; somebody else already finished it.
    NotPending,
}

/// Per-status pending-resolution bookkeeping.
#[async_trait]
pub trait ResolutionTracker: Send + Sync {
    /// Record outstanding URLs.
    ///
    /// When no round is in flight for the status, `baseline` replaces the
    /// resolved-ID snapshot. URLs join an in-flight round otherwise.
    async fn track(
        &self,
        status_id: StatusId,
        urls: &[String],
        baseline: &[StatusId],
    ) -> AppResult<()>;

    /// Remove `url` from the pending set and, if that emptied it, read and
    /// clear both sets in the same atomic step.
    async fn finish(&self, status_id: StatusId, url: &str) -> AppResult<DrainOutcome>;

    /// URLs still outstanding for a status.
    async fn pending(&self, status_id: StatusId) -> AppResult<Vec<String>>;
}
