//! Pipeline services and the collaborator interfaces they depend on.

pub mod coordination;
pub mod distribution;
pub mod emoji_reaction;
pub mod event_publisher;
pub mod jobs;
pub mod notifier;
pub mod reference;
pub mod remote;
pub mod search;
pub mod timeline;

pub use coordination::{
    DrainOutcome, LockAcquisition, LockHandle, LockManager, ResolutionTracker, lock_key,
};
pub use distribution::{DistributionPhase, DistributionReport, DistributionService};
pub use emoji_reaction::{EmojiReactionCacheService, InvalidationReport, summarize_reactions};
pub use event_publisher::{EventPublisher, NoOpEventPublisher, StreamChannel, StreamEvent};
pub use jobs::{DeliveryTarget, DistributionOptions, JobSubmitter, ResolveOptions};
pub use notifier::{NoOpNotifier, Notifier};
pub use reference::{DropReason, ReferenceResolver, ResolutionOutcome, ResolverConfig};
pub use remote::{FetchError, FetchOptions, HttpRemoteFetcher, RemoteFetcher};
pub use search::{NoOpSearchIndexer, SearchIndexer, StatusDocument};
#[cfg(feature = "meilisearch")]
pub use search::MeilisearchIndexer;
pub use timeline::{NoOpTimelineStore, TimelineStore};
