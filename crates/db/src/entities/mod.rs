//! Database entities.

pub mod account;
pub mod custom_emoji;
pub mod emoji_reaction;
pub mod follow;
pub mod status;
pub mod status_reference;

pub use account::Entity as Account;
pub use custom_emoji::Entity as CustomEmoji;
pub use emoji_reaction::Entity as EmojiReaction;
pub use follow::Entity as Follow;
pub use status::Entity as Status;
pub use status_reference::Entity as StatusReference;
