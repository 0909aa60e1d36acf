//! Domain model shared by the pipeline services.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status ID (monotonically increasing).
pub type StatusId = i64;
/// Account ID.
pub type AccountId = i64;
/// Custom emoji ID.
pub type EmojiId = i64;

/// Status visibility levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Everyone, listed on public timelines.
    Public,
    /// Everyone, kept off public timelines.
    Unlisted,
    /// Followers only.
    Private,
    /// Followers and an explicit audience circle.
    Limited,
    /// Mentioned accounts only.
    Direct,
    /// The author only.
    Personal,
}

impl Visibility {
    /// Lowercase name, as stored and serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Limited => "limited",
            Self::Direct => "direct",
            Self::Personal => "personal",
        }
    }

    /// Whether anyone may see the status without a relationship to the author.
    #[must_use]
    pub const fn is_distributable(self) -> bool {
        matches!(self, Self::Public | Self::Unlisted)
    }

    /// Whether the status belongs in the search index.
    #[must_use]
    pub const fn is_searchable(self) -> bool {
        self.is_distributable()
    }

    /// Whether the status goes to the author's followers.
    #[must_use]
    pub const fn reaches_followers(self) -> bool {
        matches!(self, Self::Public | Self::Unlisted | Self::Private)
    }

    /// Whether the status goes to the accounts it mentions.
    #[must_use]
    pub const fn reaches_mentions(self) -> bool {
        matches!(self, Self::Limited | Self::Direct)
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub account_id: AccountId,
    /// Authored on this instance.
    pub local: bool,
    pub visibility: Visibility,
    pub uri: String,
    pub url: Option<String>,
    pub text: String,
    pub mentioned_account_ids: Vec<AccountId>,
    /// Links to other statuses found in the text, in order of appearance.
    pub reference_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A status fetched from another server, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub uri: String,
    pub url: Option<String>,
    /// Actor URI of the author.
    pub account_uri: String,
    pub visibility: Visibility,
    pub text: String,
    pub published: DateTime<Utc>,
}

/// A custom emoji definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmoji {
    pub id: EmojiId,
    pub shortcode: String,
    /// `None` for local emojis.
    pub domain: Option<String>,
    pub image_url: String,
    pub static_image_url: Option<String>,
    pub disabled: bool,
}

/// A single emoji reaction on a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiReaction {
    pub id: i64,
    pub account_id: AccountId,
    pub status_id: StatusId,
    /// Unicode emoji or custom shortcode.
    pub name: String,
    pub custom_emoji_id: Option<EmojiId>,
}

/// One entry of the denormalized reaction cache of a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub name: String,
    pub count: u64,
    /// Reacting accounts, ascending.
    pub account_ids: Vec<AccountId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}
