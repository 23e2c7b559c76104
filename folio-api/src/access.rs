//! Access Decision Engine
//!
//! Decides whether a resolved identity may proceed, in this order:
//!
//! 1. `admin` is always allowed.
//! 2. A configured role must match exactly.
//! 3. No required permissions means allowed.
//! 4. Any one required permission matched by any grant (wildcards apply)
//!    means allowed.
//! 5. With self-access configured, ownership of the resource named by the
//!    numeric id in the request path means allowed. This is the only step
//!    that reads the backing store, and it reads it once.
//! 6. Otherwise denied.

use async_trait::async_trait;
use folio_core::{Permission, PermissionSet, ResourceKind, Role, UserId};
use folio_storage::{QueryConfig, QueryExecutor};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult, ErrorCode};

// ============================================================================
// IDENTITY AND POLICY
// ============================================================================

/// Authenticated identity with its effective permissions.
///
/// Lives in request extensions for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub user_id: UserId,
    pub email: Option<String>,
    pub role: Role,
    pub permissions: PermissionSet,
}

impl ResolvedIdentity {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// What a route requires of its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub required_role: Option<Role>,
    /// Satisfied when any one of these is granted.
    pub required_permissions: Vec<Permission>,
    /// Fall back to an ownership check on this resource kind.
    pub self_access: Option<ResourceKind>,
}

impl AccessPolicy {
    /// Authenticated callers only, no further checks.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn role(role: Role) -> Self {
        Self {
            required_role: Some(role),
            ..Self::default()
        }
    }

    pub fn permission(permission: Permission) -> Self {
        Self {
            required_permissions: vec![permission],
            ..Self::default()
        }
    }

    pub fn or_permission(mut self, permission: Permission) -> Self {
        self.required_permissions.push(permission);
        self
    }

    pub fn allow_self_access(mut self, resource: ResourceKind) -> Self {
        self.self_access = Some(resource);
        self
    }
}

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    Admin,
    NoPermissionsRequired,
    PermissionGranted,
    SelfAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    InsufficientRole,
    InsufficientPermissions,
    /// Self-access was configured and the ownership check failed.
    AccessDenied,
}

impl DenyReason {
    pub fn code(&self) -> ErrorCode {
        match self {
            DenyReason::InsufficientRole => ErrorCode::InsufficientRole,
            DenyReason::InsufficientPermissions => ErrorCode::InsufficientPermissions,
            DenyReason::AccessDenied => ErrorCode::AccessDenied,
        }
    }
}

/// Outcome of one access check. Computed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow(_))
    }

    /// `Ok` when allowed, otherwise the 403 to return.
    pub fn into_result(self, policy: &AccessPolicy) -> ApiResult<()> {
        match self {
            AccessDecision::Allow(_) => Ok(()),
            AccessDecision::Deny(DenyReason::InsufficientRole) => {
                let required = policy.required_role.map(|r| r.as_str()).unwrap_or("unknown");
                Err(ApiError::insufficient_role(format!("Requires role '{}'", required))
                    .with_details(json!({ "requiredRole": required })))
            }
            AccessDecision::Deny(DenyReason::InsufficientPermissions) => {
                let required: Vec<String> = policy
                    .required_permissions
                    .iter()
                    .map(Permission::to_string)
                    .collect();
                Err(ApiError::insufficient_permissions(format!(
                    "Requires one of: {}",
                    required.join(", ")
                ))
                .with_details(json!({ "requiredPermissions": required })))
            }
            AccessDecision::Deny(DenyReason::AccessDenied) => Err(ApiError::from_code(
                ErrorCode::AccessDenied,
            )),
        }
    }
}

/// Result of the in-memory steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Decided(AccessDecision),
    /// Permissions failed; ownership of this resource kind decides.
    NeedsOwnership(ResourceKind),
}

/// Steps 1 to 4 and 6; pure.
pub fn evaluate(identity: &ResolvedIdentity, policy: &AccessPolicy) -> Evaluation {
    if identity.is_admin() {
        return Evaluation::Decided(AccessDecision::Allow(AllowReason::Admin));
    }

    if let Some(required) = policy.required_role {
        if identity.role != required {
            return Evaluation::Decided(AccessDecision::Deny(DenyReason::InsufficientRole));
        }
    }

    if policy.required_permissions.is_empty() {
        return Evaluation::Decided(AccessDecision::Allow(AllowReason::NoPermissionsRequired));
    }

    if identity.permissions.allows_any(&policy.required_permissions) {
        return Evaluation::Decided(AccessDecision::Allow(AllowReason::PermissionGranted));
    }

    match policy.self_access {
        Some(resource) => Evaluation::NeedsOwnership(resource),
        None => Evaluation::Decided(AccessDecision::Deny(DenyReason::InsufficientPermissions)),
    }
}

/// Full decision, including the ownership fallback.
pub async fn decide(
    identity: &ResolvedIdentity,
    policy: &AccessPolicy,
    path: &str,
    ownership: &dyn OwnershipChecker,
) -> AccessDecision {
    match evaluate(identity, policy) {
        Evaluation::Decided(decision) => decision,
        Evaluation::NeedsOwnership(resource) => {
            let Some(resource_id) = extract_resource_id(path) else {
                debug!(path, "No numeric resource id in path for self-access check");
                return AccessDecision::Deny(DenyReason::AccessDenied);
            };
            if ownership.owns(identity.user_id, resource, resource_id).await {
                AccessDecision::Allow(AllowReason::SelfAccess)
            } else {
                AccessDecision::Deny(DenyReason::AccessDenied)
            }
        }
    }
}

/// Last path segment that parses as an integer id.
pub fn extract_resource_id(path: &str) -> Option<i64> {
    path.split('/')
        .rev()
        .find_map(|segment| segment.parse::<i64>().ok())
}

// ============================================================================
// OWNERSHIP
// ============================================================================

/// Answers "does this user own this resource instance?".
#[async_trait]
pub trait OwnershipChecker: Send + Sync {
    async fn owns(&self, user_id: UserId, resource: ResourceKind, resource_id: i64) -> bool;
}

/// Ownership lookups against the backing store.
///
/// - posts: `posts.author_id` equals the user id
/// - users: the user record is the caller's own
///
/// No ownership rule is defined for any other resource kind, comments
/// included; those checks always fail.
#[derive(Debug, Clone)]
pub struct StoreOwnershipChecker {
    executor: QueryExecutor,
}

impl StoreOwnershipChecker {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    async fn lookup_id(&self, sql: &str, column: &str, resource_id: i64) -> Option<i64> {
        // Ownership can change with any write; never answer from cache.
        match self
            .executor
            .first(sql, vec![json!(resource_id)], &QueryConfig::no_cache())
            .await
        {
            Ok(row) => row.and_then(|row| row.get(column).and_then(|v| v.as_i64())),
            Err(e) => {
                warn!(error = %e, resource_id, "Ownership lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl OwnershipChecker for StoreOwnershipChecker {
    async fn owns(&self, user_id: UserId, resource: ResourceKind, resource_id: i64) -> bool {
        match resource {
            ResourceKind::Posts => {
                self.lookup_id("SELECT author_id FROM posts WHERE id = ?", "author_id", resource_id)
                    .await
                    == Some(user_id.get())
            }
            ResourceKind::Users => {
                resource_id == user_id.get()
                    && self
                        .lookup_id("SELECT id FROM users WHERE id = ?", "id", resource_id)
                        .await
                        == Some(user_id.get())
            }
            ResourceKind::Comments => {
                warn!(user_id = %user_id, resource_id, "Self-access on comments is not supported");
                false
            }
            other => {
                warn!(user_id = %user_id, resource = %other, "No ownership rule for resource");
                false
            }
        }
    }
}
