//! Redis key layout.
//!
//! Every key lives under the configured prefix:
//!
//! | Key | Type | Holds |
//! |-----|------|-------|
//! | `{prefix}:queue:{lane}` | list | ready job IDs |
//! | `{prefix}:inflight:{lane}` | sorted set | job ID by execution deadline (ms) |
//! | `{prefix}:retry:{lane}` | sorted set | job ID by due time (ms) |
//! | `{prefix}:job:{id}` | hash | `envelope` JSON and current `lease` |
//! | `{prefix}:unique:{key}` | string | ID of the job holding a uniqueness key |
//! | `{prefix}:dead` | list | dead-letter entries, newest first |
//! | `{prefix}:lock:{type}:{id}` | string | lock holder token |
//! | `{prefix}:pending:{status}` | set | outstanding reference URLs |
//! | `{prefix}:resolved:{status}` | set | reference IDs at round start |
//! | `{prefix}:feed:home:{account}` | sorted set | home feed |
//! | `{prefix}:timeline:public[:local]` | sorted set | public feeds |

#![allow(missing_docs)]

use fanout_core::{AccountId, StatusId};

use crate::job::Lane;

/// Builds namespaced keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a key builder for `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Namespace prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix an arbitrary key.
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    #[must_use]
    pub fn ready(&self, lane: Lane) -> String {
        self.key(&format!("queue:{lane}"))
    }

    #[must_use]
    pub fn inflight(&self, lane: Lane) -> String {
        self.key(&format!("inflight:{lane}"))
    }

    #[must_use]
    pub fn retry(&self, lane: Lane) -> String {
        self.key(&format!("retry:{lane}"))
    }

    /// Prefix of job hashes; the job ID is appended.
    #[must_use]
    pub fn job_prefix(&self) -> String {
        self.key("job:")
    }

    #[must_use]
    pub fn job(&self, id: &str) -> String {
        format!("{}{id}", self.job_prefix())
    }

    #[must_use]
    pub fn unique(&self, key: &str) -> String {
        self.key(&format!("unique:{key}"))
    }

    #[must_use]
    pub fn dead(&self) -> String {
        self.key("dead")
    }

    #[must_use]
    pub fn pending(&self, status_id: StatusId) -> String {
        self.key(&format!("pending:{status_id}"))
    }

    #[must_use]
    pub fn resolved(&self, status_id: StatusId) -> String {
        self.key(&format!("resolved:{status_id}"))
    }

    #[must_use]
    pub fn home_feed(&self, account_id: AccountId) -> String {
        self.key(&format!("feed:home:{account_id}"))
    }

    #[must_use]
    pub fn public_timeline(&self, local: bool) -> String {
        if local {
            self.key("timeline:public:local")
        } else {
            self.key("timeline:public")
        }
    }
}
