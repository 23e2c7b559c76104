//! API Configuration Module
//!
//! CORS and deployment settings for the HTTP layer, loaded from environment
//! variables with development defaults.

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS and environment-dependent behavior.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Deployment environment (development, staging, production).
    /// Outside development, backing store error text is not sent to clients.
    pub environment: String,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://example.com,*.example.com"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FOLIO_ENVIRONMENT`: deployment environment (default: development)
    /// - `FOLIO_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `FOLIO_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `FOLIO_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        let environment =
            std::env::var("FOLIO_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let cors_origins = std::env::var("FOLIO_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("FOLIO_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("FOLIO_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86400);

        Self {
            environment,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(host) = origin.strip_prefix("https://") {
                    return host == pattern || host.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}
