//! In-process implementations of every collaborator trait.
//!
//! Used by the unit tests here and the pipeline tests of the queue crate.

mod coordination;
mod sinks;
mod store;

pub use coordination::{MemoryLockManager, MemoryResolutionTracker};
pub use sinks::{
    MemorySearchIndexer, MemoryTimelineStore, RecordedNotification, RecordingJobSubmitter,
    RecordingNotifier, RecordingPublisher, StubRemoteFetcher, StubResponse, SubmittedJob,
};
pub use store::MemoryStore;
