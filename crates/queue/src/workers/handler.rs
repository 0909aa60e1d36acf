//! Dispatches jobs to the pipeline services.

use async_trait::async_trait;
use fanout_common::AppResult;
use fanout_core::{
    DistributionService, EmojiReactionCacheService, ReferenceResolver, ResolveOptions,
};
use tracing::{debug, info};

use super::JobHandler;
use crate::job::{Job, JobEnvelope};

/// Runs distribution, reference resolution and reaction cache jobs.
#[derive(Clone)]
pub struct FanoutJobHandler {
    distribution: DistributionService,
    resolver: ReferenceResolver,
    reactions: EmojiReactionCacheService,
}

impl FanoutJobHandler {
    /// Create a handler over the pipeline services.
    #[must_use]
    pub const fn new(
        distribution: DistributionService,
        resolver: ReferenceResolver,
        reactions: EmojiReactionCacheService,
    ) -> Self {
        Self {
            distribution,
            resolver,
            reactions,
        }
    }
}

#[async_trait]
impl JobHandler for FanoutJobHandler {
    async fn execute(&self, envelope: &JobEnvelope) -> AppResult<()> {
        match &envelope.job {
            Job::Distribute { status_id, options } => {
                let report = self.distribution.distribute(*status_id, options).await?;

                // First full delivery of a new status starts reference resolution.
                if report.status_found && !options.update && options.targets.is_none() {
                    let urls = self
                        .resolver
                        .request_for_status(*status_id, &ResolveOptions::default())
                        .await?;
                    if !urls.is_empty() {
                        debug!(status_id, count = urls.len(), "Queued reference resolution");
                    }
                }
                Ok(())
            }
            Job::ResolveReference {
                status_id,
                reference_url,
                options,
            } => {
                self.resolver
                    .resolve(
                        *status_id,
                        reference_url,
                        options,
                        envelope.is_final_attempt(),
                    )
                    .await?;
                Ok(())
            }
            Job::RefreshEmojiReactions { emoji_ids } => {
                let report = self.reactions.invalidate(emoji_ids).await?;
                info!(
                    emojis = emoji_ids.len(),
                    statuses = report.statuses,
                    refreshed = report.refreshed,
                    failed = report.failed.len(),
                    "Emoji reaction caches refreshed"
                );
                Ok(())
            }
        }
    }

    async fn on_dead(&self, envelope: &JobEnvelope) -> AppResult<()> {
        if let Job::ResolveReference {
            status_id,
            reference_url,
            ..
        } = &envelope.job
        {
            self.resolver.abandon(*status_id, reference_url).await?;
        }
        Ok(())
    }
}
