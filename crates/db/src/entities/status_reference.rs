//! Status reference entity (a status linking to another status).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "status_reference")]
pub struct Model {
    /// The referencing status
    #[sea_orm(primary_key, auto_increment = false)]
    pub status_id: i64,

    /// The referenced status
    #[sea_orm(primary_key, auto_increment = false)]
    pub target_status_id: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::status::Entity",
        from = "Column::StatusId",
        to = "super::status::Column::Id",
        on_delete = "Cascade"
    )]
    Status,

    #[sea_orm(
        belongs_to = "super::status::Entity",
        from = "Column::TargetStatusId",
        to = "super::status::Column::Id",
        on_delete = "Cascade"
    )]
    Target,
}

impl ActiveModelBehavior for ActiveModel {}
