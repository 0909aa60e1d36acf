//! Database repositories.

mod account;
mod custom_emoji;
mod emoji_reaction;
mod follow;
mod status;
mod status_reference;

pub use account::AccountRepository;
pub use custom_emoji::CustomEmojiRepository;
pub use emoji_reaction::EmojiReactionRepository;
pub use follow::FollowRepository;
pub use status::StatusRepository;
pub use status_reference::StatusReferenceRepository;
