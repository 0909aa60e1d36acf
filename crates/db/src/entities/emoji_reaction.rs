//! Emoji reaction entity (emoji reactions to statuses).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "emoji_reaction")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// The account who reacted
    pub account_id: i64,

    /// The status being reacted to
    #[sea_orm(indexed)]
    pub status_id: i64,

    /// Unicode emoji or custom shortcode
    pub name: String,

    /// Set when `name` is a custom emoji shortcode
    #[sea_orm(nullable, indexed)]
    pub custom_emoji_id: Option<i64>,

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
        belongs_to = "super::custom_emoji::Entity",
        from = "Column::CustomEmojiId",
        to = "super::custom_emoji::Column::Id",
        on_delete = "SetNull"
    )]
    CustomEmoji,
}

impl Related<super::status::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Status.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
