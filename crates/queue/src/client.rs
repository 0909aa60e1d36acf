//! Redis connection setup.

use fanout_common::AppResult;
use fanout_common::config::RedisConfig;
use fred::clients::Client;
use fred::interfaces::ClientLike;
use fred::types::config::Config;
use tracing::info;

use crate::keys::RedisKeys;

/// Connect to Redis and wait for the connection to come up.
pub async fn connect(config: &RedisConfig) -> AppResult<Client> {
    let redis_config = Config::from_url(&config.url)?;
    let client = Client::new(redis_config, None, None, None);
    client.init().await?;

    info!(prefix = %config.prefix, "Connected to Redis");
    Ok(client)
}

/// Key builder for the configured prefix.
#[must_use]
pub fn keys(config: &RedisConfig) -> RedisKeys {
    RedisKeys::new(config.prefix.clone())
}
