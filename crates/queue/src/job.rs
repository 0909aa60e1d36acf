//! Job definitions.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fanout_common::AppError;
use fanout_core::{DistributionOptions, EmojiId, ResolveOptions, StatusId};
use serde::{Deserialize, Serialize};

/// Queue lane (priority class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Local fan-out and cache work.
    Default,
    /// Outbound pushes.
    Push,
    /// Fetching from other servers.
    Pull,
}

impl Lane {
    /// Every lane, in polling order.
    pub const ALL: [Self; 3] = [Self::Default, Self::Push, Self::Pull];

    /// Lane name as used in keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => Err(AppError::Queue(format!("unknown lane: {other}"))),
        }
    }
}

/// A unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    /// Fan a status out to its audience.
    Distribute {
        status_id: StatusId,
        #[serde(default)]
        options: DistributionOptions,
    },
    /// Resolve one reference URL of a status.
    ResolveReference {
        status_id: StatusId,
        reference_url: String,
        #[serde(default)]
        options: ResolveOptions,
    },
    /// Recompute reaction caches affected by changed emojis.
    RefreshEmojiReactions { emoji_ids: Vec<EmojiId> },
}

impl Job {
    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Distribute { .. } => "distribute",
            Self::ResolveReference { .. } => "resolve_reference",
            Self::RefreshEmojiReactions { .. } => "refresh_emoji_reactions",
        }
    }

    /// Lane the job runs on.
    #[must_use]
    pub const fn lane(&self) -> Lane {
        match self {
            Self::Distribute { .. } | Self::RefreshEmojiReactions { .. } => Lane::Default,
            Self::ResolveReference { .. } => Lane::Pull,
        }
    }

    /// Key shared by jobs that must not be pending or running at the same time.
    ///
    /// A scoped distribution retry only collides with a retry of the same
    /// target.
    #[must_use]
    pub fn uniqueness_key(&self) -> String {
        match self {
            Self::Distribute { status_id, options } => {
                let mut key = format!("distribute:{status_id}");
                if options.update {
                    key.push_str(if options.references_changed {
                        ":update:changed"
                    } else {
                        ":update"
                    });
                }
                if let Some(targets) = &options.targets {
                    for target in targets {
                        key.push(':');
                        key.push_str(&target.to_string());
                    }
                }
                key
            }
            Self::ResolveReference {
                status_id,
                reference_url,
                ..
            } => format!("resolve:{status_id}:{reference_url}"),
            Self::RefreshEmojiReactions { emoji_ids } => {
                let mut ids = emoji_ids.clone();
                ids.sort_unstable();
                ids.dedup();
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                format!("emoji_reactions:{}", ids.join(","))
            }
        }
    }
}

/// Enqueue parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Target lane.
    pub lane: Lane,
    /// Retries after the first execution.
    pub max_retries: u32,
    /// Deduplication key, if any.
    pub uniqueness_key: Option<String>,
}

impl EnqueueOptions {
    /// Options derived from the job itself: its lane and uniqueness key.
    #[must_use]
    pub fn for_job(job: &Job, max_retries: u32) -> Self {
        Self {
            lane: job.lane(),
            max_retries,
            uniqueness_key: Some(job.uniqueness_key()),
        }
    }
}

/// A job as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    pub job: Job,
    pub lane: Lane,
    /// Failed executions so far.
    pub attempts: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniqueness_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Token of the current execution, set by dequeue.
    #[serde(skip)]
    pub lease: Option<String>,
}

impl JobEnvelope {
    /// Wrap a job for storage.
    #[must_use]
    pub fn new(id: String, job: Job, options: EnqueueOptions) -> Self {
        Self {
            id,
            job,
            lane: options.lane,
            attempts: 0,
            max_retries: options.max_retries,
            uniqueness_key: options.uniqueness_key,
            enqueued_at: Utc::now(),
            last_error: None,
            lease: None,
        }
    }

    /// Whether a failure of the current execution goes to the dead-letter list.
    #[must_use]
    pub const fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_retries
    }
}
