//! Cache Administration Endpoints
//!
//! Admin role only:
//! - `POST /api/admin/cache/invalidate` `{pattern?}`
//! - `GET /api/admin/cache/stats`
//! - `DELETE /api/admin/users/:id/permissions`

use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Json, Router,
};
use folio_core::{Role, UserId};
use folio_storage::{CacheStats, QueryStatEntry, QueryTotals};
use serde::{Deserialize, Serialize};

use crate::access::AccessPolicy;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth_middleware, require_access, AccessGuard, AuthExtractor};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    /// Substring of the cache keys to drop. Absent clears the local tier.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResponse {
    pub pattern: Option<String>,
    pub invalidated: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    pub cache: CacheStats,
    pub hit_rate: f64,
    pub queries: QueryTotals,
    pub slow_query_threshold_ms: u64,
    pub slow_queries: Vec<QueryStatEntry>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEvictionResponse {
    pub user_id: UserId,
    pub evicted: bool,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/admin/cache/invalidate
pub async fn invalidate_cache(
    State(state): State<AppState>,
    AuthExtractor(admin): AuthExtractor,
    body: Option<Json<InvalidateRequest>>,
) -> ApiResult<Json<InvalidateResponse>> {
    let pattern = body.and_then(|Json(req)| req.pattern);
    if matches!(pattern.as_deref(), Some(p) if p.trim().is_empty()) {
        return Err(ApiError::invalid_input("pattern must not be empty"));
    }

    let invalidated = state.executor.cache().invalidate(pattern.as_deref());
    tracing::info!(
        admin_id = %admin.user_id,
        pattern = ?pattern,
        invalidated,
        "Query cache invalidated"
    );

    Ok(Json(InvalidateResponse {
        pattern,
        invalidated,
    }))
}

/// GET /api/admin/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let executor = &state.executor;
    let threshold = executor.config().slow_query_threshold;
    let cache = executor.cache().stats();

    Json(CacheStatsResponse {
        hit_rate: cache.hit_rate(),
        cache,
        queries: executor.stats().totals(),
        slow_query_threshold_ms: threshold.as_millis() as u64,
        slow_queries: executor.stats().slow_queries(threshold),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// DELETE /api/admin/users/:id/permissions
///
/// Call after changing a user's role so the next request re-resolves.
pub async fn evict_user_permissions(
    State(state): State<AppState>,
    AuthExtractor(admin): AuthExtractor,
    Path(id): Path<i64>,
) -> ApiResult<Json<PermissionEvictionResponse>> {
    let user_id = UserId::new(id);
    let evicted = state.auth.resolver.invalidate(user_id).await;
    if !evicted {
        return Err(ApiError::cache_unavailable(
            "Permission cache eviction did not complete",
        ));
    }

    tracing::info!(admin_id = %admin.user_id, user_id = %user_id, "Permission cache evicted");
    Ok(Json(PermissionEvictionResponse { user_id, evicted }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    let guard = AccessGuard::new(AccessPolicy::role(Role::Admin), state.ownership.clone());

    Router::new()
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/cache/stats", get(cache_stats))
        .route("/users/:id/permissions", delete(evict_user_permissions))
        .route_layer(from_fn_with_state(guard, require_access))
        .route_layer(from_fn_with_state(state.auth.clone(), auth_middleware))
        .with_state(state)
}
