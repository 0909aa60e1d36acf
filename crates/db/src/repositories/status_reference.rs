//! Status reference repository.

use std::sync::Arc;

use crate::entities::{StatusReference, status_reference};
use fanout_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

/// Status reference repository for database operations.
#[derive(Clone)]
pub struct StatusReferenceRepository {
    db: Arc<DatabaseConnection>,
}

impl StatusReferenceRepository {
    /// Create a new status reference repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Link a status to a target. An existing link is left untouched.
    ///
    /// Returns `true` when a new row was written.
    pub async fn create_if_absent(&self, status_id: i64, target_status_id: i64) -> AppResult<bool> {
        let model = status_reference::ActiveModel {
            status_id: Set(status_id),
            target_status_id: Set(target_status_id),
            created_at: Set(chrono::Utc::now().into()),
        };

        let inserted = StatusReference::insert(model)
            .on_conflict(
                OnConflict::columns([
                    status_reference::Column::StatusId,
                    status_reference::Column::TargetStatusId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(inserted > 0)
    }

    /// IDs of every status referenced by `status_id`, oldest link first.
    pub async fn find_target_ids(&self, status_id: i64) -> AppResult<Vec<i64>> {
        let references = StatusReference::find()
            .filter(status_reference::Column::StatusId.eq(status_id))
            .order_by_asc(status_reference::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(references.into_iter().map(|r| r.target_status_id).collect())
    }
}
