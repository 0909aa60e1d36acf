//! Follow repository.

use std::sync::Arc;

use crate::entities::{Follow, follow};
use fanout_common::{AppError, AppResult};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};

/// Follow repository for database operations.
#[derive(Clone)]
pub struct FollowRepository {
    db: Arc<DatabaseConnection>,
}

impl FollowRepository {
    /// Create a new follow repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// IDs of every account following `target_account_id`.
    pub async fn find_follower_ids(&self, target_account_id: i64) -> AppResult<Vec<i64>> {
        let follows = Follow::find()
            .filter(follow::Column::TargetAccountId.eq(target_account_id))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(follows.into_iter().map(|f| f.account_id).collect())
    }

    /// Check if an account is following another account.
    pub async fn is_following(&self, account_id: i64, target_account_id: i64) -> AppResult<bool> {
        let count = Follow::find()
            .filter(follow::Column::AccountId.eq(account_id))
            .filter(follow::Column::TargetAccountId.eq(target_account_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(count > 0)
    }
}
