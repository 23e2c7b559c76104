//! Identity Endpoint
//!
//! `GET /api/auth/me` returns the caller's verified identity and effective
//! permissions.

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};

use crate::access::ResolvedIdentity;
use crate::middleware::{auth_middleware, AuthExtractor};
use crate::state::AppState;

/// GET /api/auth/me
pub async fn me(AuthExtractor(identity): AuthExtractor) -> Json<ResolvedIdentity> {
    Json(identity)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/me", get(me))
        .route_layer(from_fn_with_state(state.auth.clone(), auth_middleware))
        .with_state(state)
}
