//! Emoji reaction cache maintenance.
//!
//! Statuses keep a denormalized summary of their reactions. When custom emojis
//! change, every status reacted to with one of them is recomputed from the
//! reaction rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use fanout_common::{AppResult, Metrics};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::model::{AccountId, CustomEmoji, EmojiId, EmojiReaction, ReactionSummary, StatusId};
use crate::store::EmojiReactionStore;

const REFRESH_CONCURRENCY: usize = 8;

/// Result of one invalidation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Dependent statuses found.
    pub statuses: usize,
    /// Caches rewritten.
    pub refreshed: usize,
    /// Statuses deleted in the meantime.
    pub missing: usize,
    /// Statuses whose refresh failed, ascending.
    pub failed: Vec<StatusId>,
}

/// Recomputes reaction caches.
#[derive(Clone)]
pub struct EmojiReactionCacheService {
    store: Arc<dyn EmojiReactionStore>,
    metrics: Arc<Metrics>,
}

impl EmojiReactionCacheService {
    /// Create a new service.
    #[must_use]
    pub fn new(store: Arc<dyn EmojiReactionStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Refresh the reaction cache of every status using any of `emoji_ids`.
    ///
    /// A status that fails is logged and reported; the rest of the batch
    /// still runs.
    pub async fn invalidate(&self, emoji_ids: &[EmojiId]) -> AppResult<InvalidationReport> {
        let mut emoji_ids = emoji_ids.to_vec();
        emoji_ids.sort_unstable();
        emoji_ids.dedup();
        if emoji_ids.is_empty() {
            return Ok(InvalidationReport::default());
        }

        let status_ids = self.store.status_ids_with_emojis(&emoji_ids).await?;
        debug!(emojis = emoji_ids.len(), statuses = status_ids.len(), "Refreshing reaction caches");

        let results: Vec<(StatusId, AppResult<bool>)> = stream::iter(status_ids.iter().copied())
            .map(|status_id| async move { (status_id, self.refresh_status(status_id).await) })
            .buffer_unordered(REFRESH_CONCURRENCY)
            .collect()
            .await;

        let mut report = InvalidationReport {
            statuses: status_ids.len(),
            ..InvalidationReport::default()
        };
        for (status_id, result) in results {
            match result {
                Ok(true) => report.refreshed += 1,
                Ok(false) => report.missing += 1,
                Err(e) => {
                    warn!(status_id, error = %e, "Failed to refresh reaction cache");
                    report.failed.push(status_id);
                }
            }
        }
        report.failed.sort_unstable();

        info!(
            statuses = report.statuses,
            refreshed = report.refreshed,
            failed = report.failed.len(),
            "Reaction caches refreshed"
        );
        Ok(report)
    }

    /// Recompute and store the cache of one status.
    ///
    /// Returns `false` when the status no longer exists.
    pub async fn refresh_status(&self, status_id: StatusId) -> AppResult<bool> {
        let reactions = self.store.emoji_reactions(status_id).await?;

        let emoji_ids: Vec<EmojiId> = reactions
            .iter()
            .filter_map(|r| r.custom_emoji_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let emojis = if emoji_ids.is_empty() {
            Vec::new()
        } else {
            self.store.custom_emojis(&emoji_ids).await?
        };

        let summaries = summarize_reactions(&reactions, &emojis);
        let saved = self
            .store
            .save_reaction_summaries(status_id, &summaries)
            .await?;
        if saved {
            Metrics::incr(&self.metrics.reaction_caches_refreshed);
        }
        Ok(saved)
    }
}

/// Build the reaction summaries of a status.
///
/// Reactions are grouped by name and emoji, each account counted once.
/// Groups are ordered by count, most first, then by name. Disabled emojis keep
/// their entry but lose their image.
#[must_use]
pub fn summarize_reactions(
    reactions: &[EmojiReaction],
    emojis: &[CustomEmoji],
) -> Vec<ReactionSummary> {
    let emojis: HashMap<EmojiId, &CustomEmoji> = emojis.iter().map(|e| (e.id, e)).collect();

    let mut groups: BTreeMap<(&str, Option<EmojiId>), BTreeSet<AccountId>> = BTreeMap::new();
    for reaction in reactions {
        groups
            .entry((reaction.name.as_str(), reaction.custom_emoji_id))
            .or_default()
            .insert(reaction.account_id);
    }

    let mut summaries: Vec<ReactionSummary> = groups
        .into_iter()
        .map(|((name, emoji_id), accounts)| {
            let emoji = emoji_id.and_then(|id| emojis.get(&id).copied());
            let visible = emoji.filter(|e| !e.disabled);
            ReactionSummary {
                name: name.to_string(),
                count: accounts.len() as u64,
                account_ids: accounts.into_iter().collect(),
                url: visible.map(|e| e.image_url.clone()),
                static_url: visible.map(|e| {
                    e.static_image_url
                        .clone()
                        .unwrap_or_else(|| e.image_url.clone())
                }),
                domain: emoji.and_then(|e| e.domain.clone()),
            }
        })
        .collect();

    // Stable sort keeps the (name, emoji) order among equal counts.
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}
