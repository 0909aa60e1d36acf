//! fanout-rs worker entry point.
//!
//! Runs the job workers and queue maintenance for the distribution pipeline.
//! Statuses enter the pipeline through jobs queued by the host application.

use std::sync::Arc;

use fanout_common::config::SearchConfig;
use fanout_common::{AppResult, Config, Metrics};
use fanout_core::{
    DbStore, DistributionService, EmojiReactionCacheService, HttpRemoteFetcher,
    NoOpSearchIndexer, ReferenceResolver, ResolverConfig, SearchIndexer,
};
use fanout_queue::{
    FanoutJobHandler, JobHandler, JobQueue, Lane, QueueJobSubmitter, QueueSettings, RedisJobQueue,
    RedisLockManager, RedisPubSub, RedisResolutionTracker, RedisTimelineStore, Scheduler,
    SchedulerConfig, WorkerPool, WorkerSettings,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Human-readable logs by default, JSON lines with `FANOUT_LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "fanout=info".into());
    let json = std::env::var("FANOUT_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[cfg(feature = "meilisearch")]
fn search_indexer(config: &SearchConfig) -> AppResult<Arc<dyn SearchIndexer>> {
    match (config.enabled, &config.meilisearch_url) {
        (true, Some(url)) => Ok(Arc::new(fanout_core::MeilisearchIndexer::new(
            url,
            config.meilisearch_api_key.clone(),
        )?)),
        (true, None) => {
            warn!("Search is enabled but search.meilisearch_url is not set");
            Ok(Arc::new(NoOpSearchIndexer))
        }
        (false, _) => Ok(Arc::new(NoOpSearchIndexer)),
    }
}

#[cfg(not(feature = "meilisearch"))]
#[allow(clippy::unnecessary_wraps)]
fn search_indexer(config: &SearchConfig) -> AppResult<Arc<dyn SearchIndexer>> {
    if config.enabled {
        warn!("Search is enabled but this build has no Meilisearch support");
    }
    Ok(Arc::new(NoOpSearchIndexer))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("Starting fanout-rs...");

    let config = Config::load()?;
    let metrics = Arc::new(Metrics::new());

    // Storage
    let db = Arc::new(fanout_db::init(&config).await?);
    info!("Connected to database");
    let store = Arc::new(DbStore::new(db));

    // Redis
    let redis = fanout_queue::connect(&config.redis).await?;
    let keys = fanout_queue::client::keys(&config.redis);

    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(
        redis.clone(),
        keys.clone(),
        QueueSettings::from(&config.queue),
    ));
    let submitter = Arc::new(QueueJobSubmitter::new(
        queue.clone(),
        metrics.clone(),
        config.distribution.max_retries,
        config.references.max_retries,
    ));
    let pubsub = Arc::new(RedisPubSub::new(redis.clone(), keys.clone()));
    let timelines = Arc::new(RedisTimelineStore::new(
        redis.clone(),
        keys.clone(),
        config.distribution.home_feed_max,
    ));
    let locks = Arc::new(RedisLockManager::new(redis.clone(), keys.clone()));
    let tracker = Arc::new(RedisResolutionTracker::new(redis, keys));

    // Outbound
    let search = search_indexer(&config.search)?;
    let fetcher = Arc::new(HttpRemoteFetcher::new(&config.federation)?);

    // Services
    let distribution = DistributionService::new(
        store.clone(),
        timelines,
        pubsub.clone(),
        search,
        locks,
        submitter.clone(),
        metrics.clone(),
        config.distribution.lock_lease(),
    );
    let resolver = ReferenceResolver::new(
        store.clone(),
        fetcher,
        tracker,
        submitter,
        pubsub,
        metrics.clone(),
        ResolverConfig::from(&config),
    );
    let reactions = EmojiReactionCacheService::new(store, metrics.clone());
    let handler: Arc<dyn JobHandler> =
        Arc::new(FanoutJobHandler::new(distribution, resolver, reactions));

    // Workers and maintenance
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::new(
        queue.clone(),
        handler.clone(),
        metrics.clone(),
        WorkerSettings::from(&config.queue),
    );

    let mut tasks = Vec::new();
    for (lane, concurrency) in [
        (Lane::Default, config.queue.default_concurrency),
        (Lane::Push, config.queue.push_concurrency),
        (Lane::Pull, config.queue.pull_concurrency),
    ] {
        tasks.extend(pool.spawn(lane, concurrency, &shutdown_rx));
    }
    tasks.extend(
        Scheduler::new(queue, metrics.clone(), SchedulerConfig::from(&config.queue))
            .with_handler(handler)
            .spawn(&shutdown_rx),
    );

    info!(
        local_domain = %config.federation.local_domain,
        prefix = %config.redis.prefix,
        "fanout-rs is running"
    );

    shutdown_signal().await;

    // Workers finish the job in hand before exiting.
    if shutdown_tx.send(true).is_err() {
        warn!("All workers had already stopped");
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Worker task failed");
        }
    }

    info!(metrics = ?metrics.snapshot(), "Shutdown complete");
    Ok(())
}
