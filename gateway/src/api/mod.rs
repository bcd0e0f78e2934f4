use anyhow::Context;

use crate::api::state::ApiState;
use crate::config::AppConfig;
use crate::redis::RedisClient;

pub mod config;
pub mod controllers;
pub mod endpoint;
pub mod models;
pub mod state;

pub async fn http_service(config: AppConfig) -> anyhow::Result<()> {
    let redis_url = std::env::var("REDIS_URL").context("REDIS_URL not set")?;
    tracing::info!("connecting to Redis...");
    let redis_client = RedisClient::new(&redis_url, &config.redis)
        .await
        .context("failed to connect to Redis")?;
    tracing::info!("Redis connected");

    tracing::info!(listen_addr = %config.api.listen_addr, "API server starting...");

    let http_client = reqwest::Client::builder()
        .timeout(config.api.oauth.request_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let state = ApiState::builder()
        .with_config(config.api)
        .with_http_client(http_client)
        .with_redis_client(redis_client)
        .build()?;

    let endpoint = state.bind_endpoint().await?;

    tokio::task::spawn(async move {
        if let Err(e) = endpoint.serve().await {
            tracing::error!("API server failed: {e:?}");
        }
        tracing::info!("API server stopped");
    });

    Ok(())
}
