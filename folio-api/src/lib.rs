//! Folio API - HTTP Layer for the Folio CMS
//!
//! Axum routes over the `folio-storage` query executor, guarded by JWT
//! authentication, cached permission resolution and per-route access
//! policies.

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod permissions;
pub mod routes;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use access::{
    decide, evaluate, extract_resource_id, AccessDecision, AccessPolicy, AllowReason, DenyReason,
    Evaluation, OwnershipChecker, ResolvedIdentity, StoreOwnershipChecker,
};
pub use auth::{
    extract_bearer_token, generate_jwt_token, validate_jwt_token, verify_token, AuthConfig,
    Claims, FixedClock, JwtClock, JwtSecret, SystemClock, VerifiedToken,
};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    auth_middleware, optional_auth_middleware, require_access, AccessGuard, AuthExtractor,
    AuthMiddlewareError, AuthMiddlewareState, MaybeAuth,
};
pub use permissions::{default_permissions, permission_cache_key, PermissionResolver, PermissionSource};
pub use routes::create_api_router;
pub use state::AppState;
