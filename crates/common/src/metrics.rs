//! Pipeline metrics.
//!
//! Plain atomic counters. A single [`Metrics`] instance is created at startup and
//! handed to every component that records into it.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Pipeline metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    // === Job Queue Metrics ===
    /// Jobs enqueued
    pub jobs_enqueued: AtomicU64,
    /// Enqueues dropped because a job with the same uniqueness key existed
    pub jobs_deduplicated: AtomicU64,
    /// Jobs completed
    pub jobs_completed: AtomicU64,
    /// Jobs rescheduled after a failure
    pub jobs_retried: AtomicU64,
    /// Jobs moved to the dead-letter list
    pub jobs_dead: AtomicU64,
    /// Jobs that hit the execution timeout
    pub jobs_timed_out: AtomicU64,
    /// Total job execution time in microseconds
    pub job_time_us_total: AtomicU64,

    // === Distribution Metrics ===
    /// Distributions that ran to completion
    pub distributions_completed: AtomicU64,
    /// Distributions skipped because another worker held the lock
    pub distributions_skipped: AtomicU64,
    /// Individual delivery targets that failed
    pub delivery_failures: AtomicU64,

    // === Reference Metrics ===
    /// References materialized
    pub references_resolved: AtomicU64,
    /// References dropped (not found, rejected, or out of retries)
    pub references_dropped: AtomicU64,
    /// Republish events fired after a pending set drained
    pub republishes: AtomicU64,

    // === Cache Metrics ===
    /// Emoji reaction caches recomputed
    pub reaction_caches_refreshed: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished job execution.
    pub fn record_job(&self, duration: Duration, success: bool) {
        self.job_time_us_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let finished = self.jobs_completed.load(Ordering::Relaxed)
            + self.jobs_retried.load(Ordering::Relaxed)
            + self.jobs_dead.load(Ordering::Relaxed);
        let total_us = self.job_time_us_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_deduplicated: self.jobs_deduplicated.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dead: self.jobs_dead.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            job_avg_time_us: if finished > 0 { total_us / finished } else { 0 },
            distributions_completed: self.distributions_completed.load(Ordering::Relaxed),
            distributions_skipped: self.distributions_skipped.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            references_resolved: self.references_resolved.load(Ordering::Relaxed),
            references_dropped: self.references_dropped.load(Ordering::Relaxed),
            republishes: self.republishes.load(Ordering::Relaxed),
            reaction_caches_refreshed: self.reaction_caches_refreshed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        for (name, help, kind, value) in [
            ("fanout_jobs_enqueued", "Jobs enqueued", "counter", snapshot.jobs_enqueued),
            ("fanout_jobs_deduplicated", "Duplicate enqueues dropped", "counter", snapshot.jobs_deduplicated),
            ("fanout_jobs_completed", "Jobs completed", "counter", snapshot.jobs_completed),
            ("fanout_jobs_retried", "Jobs rescheduled", "counter", snapshot.jobs_retried),
            ("fanout_jobs_dead", "Jobs dead-lettered", "counter", snapshot.jobs_dead),
            ("fanout_jobs_timed_out", "Jobs that hit the execution timeout", "counter", snapshot.jobs_timed_out),
            ("fanout_job_avg_time_us", "Average job execution time", "gauge", snapshot.job_avg_time_us),
            ("fanout_distributions_completed", "Distributions completed", "counter", snapshot.distributions_completed),
            ("fanout_distributions_skipped", "Distributions skipped on a busy lock", "counter", snapshot.distributions_skipped),
            ("fanout_delivery_failures", "Failed delivery targets", "counter", snapshot.delivery_failures),
            ("fanout_references_resolved", "References materialized", "counter", snapshot.references_resolved),
            ("fanout_references_dropped", "References dropped", "counter", snapshot.references_dropped),
            ("fanout_republishes", "Republish events", "counter", snapshot.republishes),
            ("fanout_reaction_caches_refreshed", "Emoji reaction caches recomputed", "counter", snapshot.reaction_caches_refreshed),
        ] {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} {kind}");
            let _ = writeln!(output, "{name} {value}");
        }

        output
    }
}

/// Point-in-time copy of [`Metrics`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_deduplicated: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_dead: u64,
    pub jobs_timed_out: u64,
    pub job_avg_time_us: u64,
    pub distributions_completed: u64,
    pub distributions_skipped: u64,
    pub delivery_failures: u64,
    pub references_resolved: u64,
    pub references_dropped: u64,
    pub republishes: u64,
    pub reaction_caches_refreshed: u64,
}
