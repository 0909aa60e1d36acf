//! Custom emoji repository.

use std::sync::Arc;

use crate::entities::{CustomEmoji, custom_emoji};
use fanout_common::{AppError, AppResult};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// Custom emoji repository for database operations.
#[derive(Clone)]
pub struct CustomEmojiRepository {
    db: Arc<DatabaseConnection>,
}

impl CustomEmojiRepository {
    /// Create a new custom emoji repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find emojis by IDs. Missing IDs are skipped.
    pub async fn find_by_ids(&self, ids: Vec<i64>) -> AppResult<Vec<custom_emoji::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        CustomEmoji::find()
            .filter(custom_emoji::Column::Id.is_in(ids))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
