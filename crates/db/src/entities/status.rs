//! Status entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status visibility levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum Visibility {
    #[sea_orm(string_value = "public")]
    Public,
    #[sea_orm(string_value = "unlisted")]
    Unlisted,
    #[sea_orm(string_value = "private")]
    Private,
    #[sea_orm(string_value = "limited")]
    Limited,
    #[sea_orm(string_value = "direct")]
    Direct,
    #[sea_orm(string_value = "personal")]
    Personal,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub account_id: i64,

    /// Whether the status was authored on this instance
    #[sea_orm(default_value = true)]
    pub local: bool,

    pub visibility: Visibility,

    /// `ActivityPub` URI
    #[sea_orm(unique)]
    pub uri: String,

    /// `ActivityPub` URL (human-readable)
    #[sea_orm(nullable)]
    pub url: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub text: String,

    /// Mentioned account IDs
    #[sea_orm(column_type = "JsonBinary")]
    pub mentioned_account_ids: Json,

    /// Reference URLs found in the text
    #[sea_orm(column_type = "JsonBinary")]
    pub reference_urls: Json,

    /// Denormalized emoji reaction summaries
    #[sea_orm(column_type = "JsonBinary")]
    pub emoji_reactions: Json,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id",
        on_delete = "Cascade"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
