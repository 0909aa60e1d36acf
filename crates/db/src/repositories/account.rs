//! Account repository.

use std::sync::Arc;

use crate::entities::{Account, account};
use fanout_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// Account repository for database operations.
#[derive(Clone)]
pub struct AccountRepository {
    db: Arc<DatabaseConnection>,
}

impl AccountRepository {
    /// Create a new account repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an account by ID.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<account::Model>> {
        Account::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find an account by its actor URI.
    pub async fn find_by_uri(&self, uri: &str) -> AppResult<Option<account::Model>> {
        Account::find()
            .filter(account::Column::Uri.eq(uri))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Keep only the IDs that belong to local accounts.
    pub async fn filter_local_ids(&self, ids: Vec<i64>) -> AppResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let accounts = Account::find()
            .filter(account::Column::Id.is_in(ids))
            .filter(account::Column::Domain.is_null())
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(accounts.into_iter().map(|a| a.id).collect())
    }

    /// Create a new account.
    pub async fn create(&self, model: account::ActiveModel) -> AppResult<account::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
