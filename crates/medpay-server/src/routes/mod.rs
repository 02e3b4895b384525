//! API routes for the MedPay server.

pub mod billing;
pub mod click;
pub mod payme;

use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

/// Creates the main router: the client-facing billing API plus the two
/// gateway callback surfaces.
pub fn create_router(pool: PgPool) -> Router {
    Router::new()
        .nest("/api/v1/billing", billing::router(pool.clone()))
        .nest("/click", click::router(pool.clone()))
        .nest("/payme", payme::router(pool))
        .layer(TraceLayer::new_for_http())
}
