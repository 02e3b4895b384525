//! Postgres pool construction and embedded migrations.
//!
//! Gateway callbacks and billing requests share one pool; its size is
//! tunable per deployment through `MEDPAY_DB_MAX_CONNECTIONS`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Creates the shared connection pool for the billing engine.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(parse_max_connections(
            std::env::var("MEDPAY_DB_MAX_CONNECTIONS").ok(),
        ))
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect(database_url)
        .await
}

/// Applies the wallet, billing, and payment migrations embedded at compile
/// time.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn parse_max_connections(raw: Option<String>) -> u32 {
    raw.and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}
