use anyhow::Result;
use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, health_check, init_pool};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use media::GovernanceService;
use media::config::{GovernanceConfig, LockBackend};
use media::lock::{AdvisoryLock, LocalLocks, RedisLocks};
use media::scheduler::UsageRefresher;
use media::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting media governance service");

    let config = GovernanceConfig::load()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    if !health_check(&pool).await? {
        error!("Database health check failed");
        anyhow::bail!("database is not reachable");
    }

    let store = Arc::new(PgStore::new(pool));
    store.migrate().await?;

    let locks: Arc<dyn AdvisoryLock> = match config.lock_backend {
        LockBackend::Memory => Arc::new(LocalLocks::new(config.lock_wait())),
        LockBackend::Redis => {
            let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
            Arc::new(RedisLocks::new(redis, config.lock_ttl(), config.lock_wait()))
        }
    };
    info!("Using {:?} advisory locks", config.lock_backend);

    let service = GovernanceService::new(store.clone(), store.clone(), store, locks, &config);

    let mut scheduler = UsageRefresher::new(service.usage_tracker())
        .start(&config.usage_refresh_schedule)
        .await?;

    info!("Media governance service started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down media governance service");
    scheduler.shutdown().await?;

    Ok(())
}
