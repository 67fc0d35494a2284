//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Unauthenticated for load balancer and orchestrator probes
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/records/{entity_type}", get(handlers::list_records))
        .route(
            "/v1/records/{entity_type}/{id}",
            get(handlers::get_record)
                .put(handlers::put_record)
                .delete(handlers::delete_record),
        )
        .route(
            "/v1/records/{entity_type}/{id}/assets/{field}",
            put(handlers::upload_asset).delete(handlers::unlink_asset),
        )
        .route("/v1/admin/reconcile", post(handlers::reconcile))
        .route("/v1/admin/reconcile/runs", get(handlers::list_runs));

    let asset_routes = Router::new().route("/assets/{*key}", get(handlers::serve_asset));

    let mut router = Router::new().merge(api_routes).merge(asset_routes);

    // The metrics endpoint must be network-restricted to the scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Execution order: TraceLayer -> auth -> handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
