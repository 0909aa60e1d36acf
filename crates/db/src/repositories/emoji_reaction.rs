//! Emoji reaction repository.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entities::{EmojiReaction, emoji_reaction};
use fanout_common::{AppError, AppResult};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

/// Emoji reaction repository for database operations.
#[derive(Clone)]
pub struct EmojiReactionRepository {
    db: Arc<DatabaseConnection>,
}

impl EmojiReactionRepository {
    /// Create a new emoji reaction repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Distinct IDs of statuses carrying a reaction with any of the given emojis,
    /// in ascending order.
    pub async fn find_status_ids_by_emoji_ids(&self, emoji_ids: Vec<i64>) -> AppResult<Vec<i64>> {
        if emoji_ids.is_empty() {
            return Ok(Vec::new());
        }

        let reactions = EmojiReaction::find()
            .filter(emoji_reaction::Column::CustomEmojiId.is_in(emoji_ids))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let ids: BTreeSet<i64> = reactions.into_iter().map(|r| r.status_id).collect();
        Ok(ids.into_iter().collect())
    }

    /// All reactions on a status.
    pub async fn find_by_status(&self, status_id: i64) -> AppResult<Vec<emoji_reaction::Model>> {
        EmojiReaction::find()
            .filter(emoji_reaction::Column::StatusId.eq(status_id))
            .order_by_asc(emoji_reaction::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
