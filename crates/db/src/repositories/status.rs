//! Status repository.

use std::sync::Arc;

use crate::entities::{Status, status};
use fanout_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    sea_query::Expr,
};

/// Status repository for database operations.
#[derive(Clone)]
pub struct StatusRepository {
    db: Arc<DatabaseConnection>,
}

impl StatusRepository {
    /// Create a new status repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a status by ID.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<status::Model>> {
        Status::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a status by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: i64) -> AppResult<status::Model> {
        self.find_by_id(id)
            .await?
            .ok_or(AppError::StatusNotFound(id))
    }

    /// Find a status by URI.
    pub async fn find_by_uri(&self, uri: &str) -> AppResult<Option<status::Model>> {
        Status::find()
            .filter(status::Column::Uri.eq(uri))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a status by its human-readable URL.
    pub async fn find_by_url(&self, url: &str) -> AppResult<Option<status::Model>> {
        Status::find()
            .filter(status::Column::Url.eq(url))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new status.
    pub async fn create(&self, model: status::ActiveModel) -> AppResult<status::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a status.
    pub async fn update(&self, model: status::ActiveModel) -> AppResult<status::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Overwrite the denormalized emoji reaction summaries of a status.
    ///
    /// Returns `false` when the status no longer exists.
    pub async fn update_emoji_reactions(
        &self,
        id: i64,
        summaries: serde_json::Value,
    ) -> AppResult<bool> {
        let result = Status::update_many()
            .col_expr(status::Column::EmojiReactions, Expr::value(summaries))
            .filter(status::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }
}
