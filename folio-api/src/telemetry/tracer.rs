//! Tracing Subscriber Initialization
//!
//! JSON log lines outside development, human-readable output in development.
//! `RUST_LOG` overrides the default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "folio_api=debug,folio_storage=info,tower_http=debug,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Emit JSON log lines
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let environment =
            std::env::var("FOLIO_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let json_logs = std::env::var("FOLIO_LOG_JSON")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(environment != "development");

        Self {
            service_name: std::env::var("FOLIO_SERVICE_NAME")
                .unwrap_or_else(|_| "folio-api".to_string()),
            service_version: std::env::var("FOLIO_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment,
            json_logs,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns an error instead of panicking.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        environment = config.environment,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvVarGuard, ENV_MUTEX};

    #[test]
    fn test_telemetry_config_default() {
        let _lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _env = EnvVarGuard::set("FOLIO_ENVIRONMENT", None);
        let _json = EnvVarGuard::set("FOLIO_LOG_JSON", None);
        let _name = EnvVarGuard::set("FOLIO_SERVICE_NAME", None);

        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "folio-api");
        assert_eq!(config.environment, "development");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_json_logs_outside_development() {
        let _lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _env = EnvVarGuard::set("FOLIO_ENVIRONMENT", Some("production"));
        let _json = EnvVarGuard::set("FOLIO_LOG_JSON", None);

        assert!(TelemetryConfig::default().json_logs);
    }

    #[test]
    fn test_json_logs_override() {
        let _lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _env = EnvVarGuard::set("FOLIO_ENVIRONMENT", Some("production"));
        let _json = EnvVarGuard::set("FOLIO_LOG_JSON", Some("false"));

        assert!(!TelemetryConfig::default().json_logs);
    }
}
