//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use folio_storage::QueryExecutor;

use crate::access::{OwnershipChecker, StoreOwnershipChecker};
use crate::config::ApiConfig;
use crate::middleware::AuthMiddlewareState;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Cached query execution against the backing store.
    pub executor: QueryExecutor,
    /// Token verification and permission resolution.
    pub auth: AuthMiddlewareState,
    /// Answers self-access checks. Defaults to lookups through `executor`.
    pub ownership: Arc<dyn OwnershipChecker>,
    pub api_config: Arc<ApiConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(executor: QueryExecutor, auth: AuthMiddlewareState, api_config: ApiConfig) -> Self {
        let ownership: Arc<dyn OwnershipChecker> =
            Arc::new(StoreOwnershipChecker::new(executor.clone()));
        Self {
            executor,
            auth,
            ownership,
            api_config: Arc::new(api_config),
            start_time: Instant::now(),
        }
    }

    pub fn with_ownership(mut self, ownership: Arc<dyn OwnershipChecker>) -> Self {
        self.ownership = ownership;
        self
    }

    /// Whether backing store error text may be returned to clients.
    pub fn expose_error_details(&self) -> bool {
        self.api_config.is_development()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("executor", &self.executor)
            .field("auth", &self.auth)
            .field("api_config", &self.api_config)
            .finish()
    }
}

crate::impl_from_ref!(QueryExecutor, executor);
crate::impl_from_ref!(AuthMiddlewareState, auth);
crate::impl_from_ref!(Arc<dyn OwnershipChecker>, ownership);
crate::impl_from_ref!(Arc<ApiConfig>, api_config);
crate::impl_from_ref!(Instant, start_time);
