//! MedPay server binary.

use medpay_server::{create_router, db};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("medpay_server=info,tower_http=info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let app = create_router(pool);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("medpay-server listening on {}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
