//! Core pipeline logic for fanout-rs.
//!
//! The services in this crate only talk to the outside world through traits:
//! storage, timelines, streaming, search, remote fetch, locks, resolution
//! tracking and job submission. The Redis and queue backed implementations
//! live in `fanout-queue`; [`memory`] holds in-process ones.

pub mod memory;
pub mod model;
pub mod services;
pub mod store;

pub use model::*;
pub use services::*;
pub use store::{DbStore, EmojiReactionStore, StatusStore};
