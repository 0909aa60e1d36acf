//! Custom emoji entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Custom emoji entity for instance-level and remote custom emojis.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "custom_emoji")]
pub struct Model {
    /// Emoji ID.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// Emoji shortcode (e.g., "blobcat" for :blobcat:).
    pub shortcode: String,

    /// Host where this emoji originates (null for local).
    #[sea_orm(nullable)]
    pub domain: Option<String>,

    /// Image URL.
    pub image_url: String,

    /// Static (non-animated) version URL.
    #[sea_orm(nullable)]
    pub static_image_url: Option<String>,

    /// Disabled emojis render as plain shortcodes.
    pub disabled: bool,

    /// Updated at timestamp.
    pub updated_at: DateTimeWithTimeZone,
}

/// Emoji relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
