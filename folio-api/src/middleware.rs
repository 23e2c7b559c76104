//! Axum Middleware for Authentication and Authorization
//!
//! Per request:
//!
//! ```text
//! Unauthenticated -> TokenExtracted -> TokenVerified -> PermissionsResolved
//!                 -> Decided -> Allowed | Denied
//! ```
//!
//! [`auth_middleware`] stops at the first failing step: a missing or
//! non-Bearer `Authorization` header is `AUTH_REQUIRED`, a bad signature or
//! expired token is `INVALID_TOKEN`. On success a [`ResolvedIdentity`] is
//! put in the request extensions. [`require_access`] then applies a route's
//! [`AccessPolicy`].
//!
//! [`optional_auth_middleware`] never rejects; it attaches an identity only
//! when the token verifies.

use crate::access::{decide, AccessPolicy, OwnershipChecker, ResolvedIdentity};
use crate::auth::{extract_bearer_token, verify_token, AuthConfig};
use crate::error::{ApiError, ApiResult};
use crate::permissions::PermissionResolver;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for the authentication middleware.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
    pub resolver: PermissionResolver,
}

impl std::fmt::Debug for AuthMiddlewareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddlewareState")
            .field("auth_config", &self.auth_config)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl AuthMiddlewareState {
    pub fn new(auth_config: Arc<AuthConfig>, resolver: PermissionResolver) -> Self {
        Self {
            auth_config,
            resolver,
        }
    }

    /// Verify the request's bearer token and resolve its permissions.
    pub async fn authenticate(&self, headers: &HeaderMap) -> ApiResult<ResolvedIdentity> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::auth_required("Authentication required"))?;

        let token = extract_bearer_token(header).ok_or_else(|| {
            ApiError::auth_required("Authorization header must use Bearer scheme")
        })?;

        let verified = verify_token(&self.auth_config, token)?;
        Ok(self.resolver.resolve_identity(verified).await)
    }
}

/// State for [`require_access`]: the route's policy and how to check ownership.
#[derive(Clone)]
pub struct AccessGuard {
    pub policy: Arc<AccessPolicy>,
    pub ownership: Arc<dyn OwnershipChecker>,
}

impl AccessGuard {
    pub fn new(policy: AccessPolicy, ownership: Arc<dyn OwnershipChecker>) -> Self {
        Self {
            policy: Arc::new(policy),
            ownership,
        }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTIONS
// ============================================================================

/// Require a valid bearer token.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/auth/me", get(me))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let identity = state
        .authenticate(request.headers())
        .await
        .map_err(AuthMiddlewareError)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Attach an identity when one verifies; never reject.
pub async fn optional_auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.headers().contains_key(AUTHORIZATION) {
        match state.authenticate(request.headers()).await {
            Ok(identity) => {
                request.extensions_mut().insert(identity);
            }
            Err(e) => {
                debug!(code = %e.code, "Optional auth failed, continuing anonymously");
            }
        }
    }
    next.run(request).await
}

/// Apply an [`AccessPolicy`] to an already authenticated request.
///
/// Must be layered inside [`auth_middleware`].
pub async fn require_access(
    State(guard): State<AccessGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let identity = request
        .extensions()
        .get::<ResolvedIdentity>()
        .cloned()
        .ok_or_else(|| AuthMiddlewareError(ApiError::auth_required("Authentication required")))?;
    let path = request.uri().path().to_string();

    let decision = decide(&identity, &guard.policy, &path, guard.ownership.as_ref()).await;
    debug!(user_id = %identity.user_id, ?decision, "Access decision");

    decision
        .into_result(&guard.policy)
        .map_err(AuthMiddlewareError)?;
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware rejections.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AuthMiddlewareError(#[from] pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTORS
// ============================================================================

/// Identity attached by [`auth_middleware`].
///
/// Rejects with 500 if the middleware is not applied to the route.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub ResolvedIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "ResolvedIdentity not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = ResolvedIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Identity attached by [`optional_auth_middleware`], if any.
#[derive(Debug, Clone)]
pub struct MaybeAuth(pub Option<ResolvedIdentity>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuth(parts.extensions.get::<ResolvedIdentity>().cloned()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
