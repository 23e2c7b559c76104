//! REST API Routes Module
//!
//! - Health checks at /health/* (public)
//! - Metrics at /metrics (public)
//! - Identity at /api/auth/me (authenticated)
//! - Posts at /api/posts/* (mixed, per route)
//! - Cache administration at /api/admin/* (admin role)

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub mod admin;
pub mod auth;
pub mod health;
pub mod posts;

pub use admin::create_router as admin_router;
pub use auth::create_router as auth_router;
pub use health::create_router as health_router;
pub use posts::create_router as posts_router;

// ============================================================================
// CORS
// ============================================================================

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricted origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter(|o| !o.starts_with("*."))
            .filter_map(|o| o.parse().ok())
            .collect();

        // Wildcard entries cannot be listed literally; match them per request.
        let cors = if config.cors_origins.iter().any(|o| o.starts_with("*.")) {
            let config = config.clone();
            cors.allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _| {
                    origin
                        .to_str()
                        .map(|o| config.is_origin_allowed(o))
                        .unwrap_or(false)
                },
            ))
        } else {
            cors.allow_origin(origins)
        };

        if config.cors_allow_credentials {
            cors.allow_credentials(true)
        } else {
            cors
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
pub fn create_api_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.api_config);

    let api_routes = Router::new()
        .nest("/auth", auth::create_router(state.clone()))
        .nest("/posts", posts::create_router(state.clone()))
        .nest("/admin", admin::create_router(state.clone()));

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health::create_router(state.clone()))
        .route("/metrics", get(metrics_handler).with_state(state))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
