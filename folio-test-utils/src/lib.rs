//! Folio Test Utilities
//!
//! Shared test infrastructure for the Folio workspace:
//! - Proptest generators for identities and permissions
//! - Fixtures for auth configs, signed tokens and identities
//! - A [`TestApp`] wiring the full router over in-memory stores

// Re-export mock storage from its source crate
pub use folio_storage::{row, InMemoryKvStore, MockBackingStore};

// Re-export core types for convenience
pub use folio_core::{
    ActionKind, Permission, PermissionSet, ResourceKind, Role, UserId,
};

use std::sync::Arc;
use std::time::Duration;

use folio_api::{
    create_api_router, ApiConfig, AppState, AuthConfig, AuthMiddlewareState, FixedClock,
    JwtSecret, OwnershipChecker, PermissionResolver, ResolvedIdentity,
};
use folio_storage::{CacheConfig, ExecutorConfig, QueryExecutor, QueryStats, TieredCache};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (1i64..100_000).prop_map(UserId::new)
    }

    pub fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Admin),
            Just(Role::Editor),
            Just(Role::Author),
            Just(Role::User),
        ]
    }

    pub fn arb_non_admin_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::Editor), Just(Role::Author), Just(Role::User)]
    }

    pub fn arb_resource_kind() -> impl Strategy<Value = ResourceKind> {
        prop_oneof![
            Just(ResourceKind::Posts),
            Just(ResourceKind::Comments),
            Just(ResourceKind::Projects),
            Just(ResourceKind::Users),
            Just(ResourceKind::Analytics),
            Just(ResourceKind::Media),
            Just(ResourceKind::Settings),
            Just(ResourceKind::Cache),
        ]
    }

    pub fn arb_action_kind() -> impl Strategy<Value = ActionKind> {
        prop_oneof![
            Just(ActionKind::Create),
            Just(ActionKind::Read),
            Just(ActionKind::Update),
            Just(ActionKind::Delete),
            Just(ActionKind::Publish),
            Just(ActionKind::Manage),
        ]
    }

    /// A concrete (non-wildcard) permission.
    pub fn arb_permission() -> impl Strategy<Value = Permission> {
        (arb_resource_kind(), arb_action_kind()).prop_map(|(r, a)| Permission::new(r, a))
    }

    /// Strings that are never valid bearer tokens.
    pub fn arb_garbage_token() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z0-9]{1,64}",
            "[a-zA-Z0-9_-]{4,20}\\.[a-zA-Z0-9_-]{4,20}\\.[a-zA-Z0-9_-]{4,20}",
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// 2024-01-01 00:00:00 UTC
    pub const TEST_NOW: i64 = 1704067200;

    pub const TEST_SECRET: &str = "folio-test-secret-that-is-long-enough-for-prod";

    /// Auth config with a known secret and a clock fixed at [`TEST_NOW`].
    pub fn test_auth_config() -> AuthConfig {
        auth_config_at(TEST_NOW)
    }

    pub fn auth_config_at(now: i64) -> AuthConfig {
        AuthConfig {
            jwt_secret: JwtSecret::new(TEST_SECRET.to_string())
                .expect("test secret should be valid"),
            clock: Arc::new(FixedClock(now)),
            ..AuthConfig::default()
        }
    }

    /// Sign a token for `id` with `role` and optional explicit permissions.
    pub fn token_for(
        config: &AuthConfig,
        id: i64,
        role: Role,
        permissions: Option<Vec<&str>>,
    ) -> String {
        folio_api::generate_jwt_token(
            config,
            UserId::new(id),
            Some(format!("user{}@example.com", id)),
            role,
            permissions.map(|p| p.into_iter().map(str::to_string).collect()),
        )
        .expect("token generation should succeed")
    }

    /// `Authorization` header value for a fresh token.
    pub fn bearer(config: &AuthConfig, id: i64, role: Role) -> String {
        format!("Bearer {}", token_for(config, id, role, None))
    }

    pub fn identity(id: i64, role: Role, permissions: Vec<Permission>) -> ResolvedIdentity {
        ResolvedIdentity {
            user_id: UserId::new(id),
            email: None,
            role,
            permissions: PermissionSet::new(permissions),
        }
    }
}

// ============================================================================
// TEST APPLICATION
// ============================================================================

/// The full router over a [`MockBackingStore`] and an in-memory KV store.
///
/// Must be built inside a Tokio runtime.
pub struct TestApp {
    pub store: Arc<MockBackingStore>,
    pub kv: Arc<InMemoryKvStore>,
    pub auth_config: Arc<AuthConfig>,
    pub state: AppState,
}

impl TestApp {
    pub fn new(store: MockBackingStore) -> Self {
        Self::with_config(store, fixtures::test_auth_config(), ApiConfig::default())
    }

    pub fn with_config(store: MockBackingStore, auth_config: AuthConfig, api: ApiConfig) -> Self {
        let store = Arc::new(store);
        let kv = Arc::new(InMemoryKvStore::new());
        let cache = Arc::new(TieredCache::new(kv.clone(), CacheConfig::default()));
        let executor = QueryExecutor::new(
            store.clone(),
            cache,
            Arc::new(QueryStats::new()),
            ExecutorConfig {
                default_timeout: Duration::from_millis(500),
                ..ExecutorConfig::default()
            },
        );

        let auth_config = Arc::new(auth_config);
        let resolver = PermissionResolver::new(kv.clone(), auth_config.permission_cache_ttl);
        let auth = AuthMiddlewareState::new(auth_config.clone(), resolver);

        Self {
            store,
            kv,
            auth_config,
            state: AppState::new(executor, auth, api),
        }
    }

    pub fn with_ownership(mut self, ownership: Arc<dyn OwnershipChecker>) -> Self {
        self.state = self.state.with_ownership(ownership);
        self
    }

    pub fn router(&self) -> axum::Router {
        create_api_router(self.state.clone())
    }

    pub fn bearer(&self, id: i64, role: Role) -> String {
        fixtures::bearer(&self.auth_config, id, role)
    }

    pub fn bearer_with_permissions(&self, id: i64, role: Role, permissions: Vec<&str>) -> String {
        format!(
            "Bearer {}",
            fixtures::token_for(&self.auth_config, id, role, Some(permissions))
        )
    }
}
