//! Permission Resolution
//!
//! Turns a verified token into the effective permission set of its user.
//! Order of precedence:
//!
//! 1. Permissions embedded in the token, used as-is.
//! 2. The distributed cache entry `user_permissions:<user_id>`.
//! 3. The role default table, written back to the cache.
//!
//! A cached list stays authoritative until its TTL runs out or
//! [`PermissionResolver::invalidate`] evicts it, so a role change can take
//! up to one TTL to be seen unless the caller evicts.

use std::sync::Arc;
use std::time::Duration;

use folio_core::{ActionKind, Permission, PermissionSet, ResourceKind, Role, UserId};
use folio_storage::KvStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::access::ResolvedIdentity;
use crate::auth::VerifiedToken;
use crate::telemetry::METRICS;

pub const PERMISSION_KEY_PREFIX: &str = "user_permissions:";

/// Cache key for a user's permission list.
pub fn permission_cache_key(user_id: UserId) -> String {
    format!("{}{}", PERMISSION_KEY_PREFIX, user_id)
}

/// Permissions granted to a role when nothing more specific is known.
pub fn default_permissions(role: Role) -> PermissionSet {
    use ActionKind as A;
    use ResourceKind as R;

    let grants: &[(R, A)] = match role {
        Role::Admin => &[(R::Any, A::Any)],
        Role::Editor => &[
            (R::Posts, A::Any),
            (R::Comments, A::Any),
            (R::Projects, A::Any),
            (R::Media, A::Any),
            (R::Analytics, A::Read),
        ],
        Role::Author => &[
            (R::Posts, A::Create),
            (R::Posts, A::Read),
            (R::Posts, A::Update),
            (R::Comments, A::Read),
            (R::Media, A::Create),
            (R::Media, A::Read),
        ],
        Role::User => &[
            (R::Posts, A::Read),
            (R::Comments, A::Create),
            (R::Comments, A::Read),
            (R::Projects, A::Read),
        ],
    };

    grants
        .iter()
        .map(|(resource, action)| Permission::new(*resource, *action))
        .collect()
}

/// Where a resolved permission set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionSource {
    Token,
    Cache,
    RoleDefaults,
}

impl PermissionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionSource::Token => "token",
            PermissionSource::Cache => "cache",
            PermissionSource::RoleDefaults => "role_defaults",
        }
    }
}

/// Value stored under `user_permissions:<user_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionCacheRecord {
    permissions: Vec<String>,
    stored_at: i64,
    ttl_seconds: u64,
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Resolves effective permissions through the shared KV tier.
#[derive(Clone)]
pub struct PermissionResolver {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl PermissionResolver {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Verified token plus effective permissions.
    pub async fn resolve_identity(&self, token: VerifiedToken) -> ResolvedIdentity {
        let (permissions, _) = self
            .resolve(token.user_id, token.role, token.permissions.as_deref())
            .await;
        ResolvedIdentity {
            user_id: token.user_id,
            email: token.email,
            role: token.role,
            permissions,
        }
    }

    /// Effective permissions for `user_id` with `role`.
    ///
    /// Never fails: an unreachable or corrupt cache falls through to the
    /// role defaults.
    pub async fn resolve(
        &self,
        user_id: UserId,
        role: Role,
        embedded: Option<&[String]>,
    ) -> (PermissionSet, PermissionSource) {
        if let Some(embedded) = embedded {
            let permissions = parse_logged(user_id, embedded);
            record_lookup(PermissionSource::Token);
            return (permissions, PermissionSource::Token);
        }

        let key = permission_cache_key(user_id);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<PermissionCacheRecord>(&raw) {
                Ok(record) => {
                    debug!(user_id = %user_id, "Permission cache hit");
                    record_lookup(PermissionSource::Cache);
                    return (
                        parse_logged(user_id, &record.permissions),
                        PermissionSource::Cache,
                    );
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Discarding undecodable permission cache entry");
                }
            },
            Ok(None) => debug!(user_id = %user_id, "Permission cache miss"),
            Err(e) => warn!(user_id = %user_id, error = %e, "Permission cache read failed"),
        }

        let permissions = default_permissions(role);
        self.write_back(&key, &permissions).await;
        record_lookup(PermissionSource::RoleDefaults);
        (permissions, PermissionSource::RoleDefaults)
    }

    async fn write_back(&self, key: &str, permissions: &PermissionSet) {
        let record = PermissionCacheRecord {
            permissions: permissions.to_strings(),
            stored_at: chrono::Utc::now().timestamp_millis(),
            ttl_seconds: self.ttl.as_secs(),
        };
        let encoded = match serde_json::to_string(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode permission cache entry");
                return;
            }
        };
        if let Err(e) = self.kv.put(key, encoded, self.ttl).await {
            warn!(key, error = %e, "Permission cache write failed");
        }
    }

    /// Evict a user's cached permissions, e.g. after a role change.
    ///
    /// Returns whether the eviction reached the cache.
    pub async fn invalidate(&self, user_id: UserId) -> bool {
        match self.kv.delete(&permission_cache_key(user_id)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Permission cache eviction failed");
                false
            }
        }
    }
}

fn parse_logged(user_id: UserId, values: &[String]) -> PermissionSet {
    let (permissions, rejected) = PermissionSet::parse_lossy(values);
    for err in rejected {
        warn!(user_id = %user_id, error = %err, "Ignoring unrecognised permission");
    }
    permissions
}

fn record_lookup(source: PermissionSource) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_permission_lookup(source.as_str());
    }
}
