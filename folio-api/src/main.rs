//! Folio API Server Entry Point
//!
//! Loads configuration from the environment, wires the storage stack and
//! starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use folio_api::telemetry::{init_tracing, TelemetryConfig};
use folio_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, AuthConfig, AuthMiddlewareState,
    PermissionResolver,
};
use folio_storage::{
    CacheConfig, DbConfig, ExecutorConfig, InMemoryKvStore, KvStore, PostgresStore,
    QueryExecutor, QueryStats, TieredCache,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let auth_config = AuthConfig::from_env();
    auth_config.validate_for_production()?;
    let api_config = ApiConfig::from_env();

    let kv = connect_kv_store().await?;

    let db_config = DbConfig::from_env();
    let store = Arc::new(PostgresStore::from_config(&db_config)?);
    let cache = Arc::new(TieredCache::new(kv.clone(), CacheConfig::from_env()));
    let executor = QueryExecutor::new(
        store,
        cache.clone(),
        Arc::new(QueryStats::new()),
        ExecutorConfig::from_env(),
    );

    let resolver = PermissionResolver::new(kv, auth_config.permission_cache_ttl);
    let auth = AuthMiddlewareState::new(Arc::new(auth_config), resolver);
    let app = create_api_router(AppState::new(executor, auth, api_config));

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Folio API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Queued L2 writes would otherwise be lost.
    cache.flush().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_kv_store() -> ApiResult<Arc<dyn KvStore>> {
    match std::env::var("FOLIO_REDIS_URL") {
        Ok(url) => {
            let store = folio_storage::RedisKvStore::connect(&url).await?;
            tracing::info!("Using Redis for the distributed cache tier");
            Ok(Arc::new(store))
        }
        Err(_) => Ok(in_memory_kv_store()),
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_kv_store() -> ApiResult<Arc<dyn KvStore>> {
    if std::env::var("FOLIO_REDIS_URL").is_ok() {
        tracing::warn!("FOLIO_REDIS_URL is set but the redis feature is disabled");
    }
    Ok(in_memory_kv_store())
}

fn in_memory_kv_store() -> Arc<dyn KvStore> {
    tracing::info!("Using in-process store for the distributed cache tier");
    Arc::new(InMemoryKvStore::new())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("FOLIO_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("FOLIO_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
