//! Account entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "account")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub username: String,

    /// Remote host; `None` for local accounts
    #[sea_orm(nullable, indexed)]
    pub domain: Option<String>,

    /// `ActivityPub` actor URI
    #[sea_orm(unique)]
    pub uri: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::status::Entity")]
    Status,
}

impl Related<super::status::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Status.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the account lives on this instance.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.domain.is_none()
    }
}
