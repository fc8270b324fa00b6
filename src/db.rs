use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

/// Postgres-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgRepo {
    pub pool: PgPool,
}

impl PgRepo {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

/// Runs `check` until it succeeds, sleeping `delay` between attempts.
/// There is no attempt limit. Returns the number of attempts made.
pub async fn wait_for_db<F, Fut>(mut check: F, delay: Duration) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    info!("waiting for database");
    let mut attempts = 0;
    loop {
        attempts += 1;
        match check().await {
            Ok(()) => {
                info!(attempts, "database available");
                return attempts;
            }
            Err(e) => {
                warn!(error = %e, attempts, "database unavailable, waiting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Connectivity check used by `wait_for_db`: a fresh single connection plus `SELECT 1`.
pub async fn ping(database_url: &str) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
        .context("connect")?;
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("select 1")?;
    pool.close().await;
    Ok(())
}
