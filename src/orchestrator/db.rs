use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, PoolConfig as PoolSizing, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::orchestrator::config::DatabaseConfig;

pub type PgPool = deadpool_postgres::Pool;

mod embedded {
    refinery::embed_migrations!("migrations");
}

pub fn create_pool(database: &DatabaseConfig) -> Result<PgPool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database.url.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolSizing::new(database.pool_size));

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create Postgres connection pool")
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .context("Failed to get connection for migrations")?;
    let report = embedded::migrations::runner()
        .run_async(&mut **client)
        .await
        .context("Failed to run migrations")?;

    for migration in report.applied_migrations() {
        log::info!("Applied migration {}", migration);
    }
    Ok(())
}
