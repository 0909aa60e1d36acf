//! Job queue and Redis backends for fanout-rs.
//!
//! - **Jobs**: distribution, reference resolution and emoji reaction refresh,
//!   as one tagged [`Job`] enum
//! - **Queue**: lanes, uniqueness keys, leases and dead letters, in Redis
//!   ([`RedisJobQueue`]) or in memory ([`MemoryJobQueue`])
//! - **Retry**: exponential backoff with jitter
//! - **Workers**: per-lane polling tasks with an execution timeout
//! - **Scheduler**: retry promotion, stalled-job reaping, metrics logging
//! - **Coordination**: Redis locks and pending-resolution sets
//! - **Delivery**: Redis timelines and Pub/Sub streaming

pub mod client;
pub mod job;
pub mod keys;
pub mod lock;
pub mod pubsub;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod submitter;
pub mod timeline;
pub mod tracker;
pub mod workers;

pub use client::connect;
pub use job::{EnqueueOptions, Job, JobEnvelope, Lane};
pub use keys::RedisKeys;
pub use lock::RedisLockManager;
pub use pubsub::RedisPubSub;
pub use queue::{
    Enqueued, FailOutcome, JobQueue, MemoryJobQueue, QueueSettings, RedisJobQueue, STALLED_ERROR,
};
pub use retry::{DeadLetterEntry, RetryConfig};
pub use scheduler::{MaintenanceReport, Scheduler, SchedulerConfig};
pub use submitter::QueueJobSubmitter;
pub use timeline::RedisTimelineStore;
pub use tracker::RedisResolutionTracker;
pub use workers::{FanoutJobHandler, JobHandler, JobOutcome, WorkerPool, WorkerSettings};
