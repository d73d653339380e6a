use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use crate::config::Config;

/// Build the bounded connection pool. Recycling uses the cleaning method so
/// session state touched during a request (search_path, statement_timeout)
/// never leaks into the next one.
pub fn build_pool(cfg: &Config) -> Result<Pool> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&cfg.pg_host);
    pg.port(cfg.pg_port);
    pg.dbname(&cfg.pg_dbname);
    pg.user(&cfg.pg_user);
    pg.password(&cfg.pg_password);
    pg.connect_timeout(cfg.acquire_timeout);

    let manager = Manager::from_config(
        pg,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        },
    );
    Pool::builder(manager)
        .max_size(cfg.pool_max)
        .wait_timeout(Some(cfg.acquire_timeout))
        .create_timeout(Some(cfg.acquire_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .context("failed to build the connection pool")
}

pub async fn check_connectivity(pool: &Pool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("could not acquire a connection from the pool")?;
    conn.simple_query("SELECT 1")
        .await
        .context("connectivity check query failed")?;
    Ok(())
}

/// Periodic sweep evicting connections idle beyond the configured window.
pub async fn evict_idle(pool: Pool, idle_timeout: Duration) {
    let mut tick = tokio::time::interval(idle_timeout);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        pool.retain(|_, metrics| metrics.last_used() < idle_timeout);
        debug!(status = ?pool.status(), "idle connection sweep");
    }
}
