/// SummitHub Tracking Service - Main Entry Point
use actix_web::web;
use anyhow::Context;
use std::sync::Arc;
use summithub_core::{
    init_logging, load_dotenv, retry_with_backoff, ConfigLoader, DatabaseConfig, DatabasePool,
    LogConfig, LogFormat, RedisConfig, RetryPolicy, ServiceConfig,
};
use summithub_tracking::{
    start_server, BroadcastHub, HubConfig, PostgresTrackingRepository, RedisRelay, RelayBus,
    ServerState, TrackingAggregator,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let service_config = ServiceConfig::from_env()?;
    service_config.validate()?;

    init_logging(&LogConfig::new(
        "summithub-tracking",
        service_config.log_level.clone(),
        LogFormat::parse(&service_config.log_format),
    ))?;

    let db_config = DatabaseConfig::from_env()?;
    db_config.validate()?;

    let database = retry_with_backoff(
        || DatabasePool::new(&db_config),
        RetryPolicy::startup(),
        |e: &sqlx::Error| {
            tracing::warn!(error = %e, "Database not reachable yet");
            true
        },
    )
    .await
    .context("Failed to connect to database")?;

    let repository = PostgresTrackingRepository::new(database.pool().clone());
    repository.migrate().await?;

    let hub_config = HubConfig::from_env()?;
    let hub = match RedisConfig::from_env_optional()? {
        Some(redis_config) => {
            redis_config.validate()?;
            let relay = RedisRelay::connect(&redis_config.url, redis_config.connection_timeout)
                .await
                .context("Failed to connect redis relay")?;
            tracing::info!("Live updates relayed through redis");
            BroadcastHub::with_relay(hub_config, Arc::new(relay) as Arc<dyn RelayBus>).await
        }
        None => {
            tracing::info!("No redis configured, live updates stay in-process");
            BroadcastHub::new(hub_config)
        }
    };
    let hub = Arc::new(hub);

    let aggregator = Arc::new(TrackingAggregator::new(
        Arc::new(repository),
        Some(hub.clone()),
    ));

    let state = web::Data::new(ServerState::new(aggregator, hub.clone()).with_database(database));

    let result = start_server(&service_config, state).await;

    hub.shutdown().await;
    tracing::info!("Tracking service stopped");

    result.context("HTTP server failed")
}
