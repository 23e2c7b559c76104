//! Error Types for the Folio API
//!
//! Every failure leaving the HTTP layer is an [`ApiError`], serialized as
//!
//! ```json
//! { "success": false, "code": "INSUFFICIENT_PERMISSIONS", "error": "..." }
//! ```
//!
//! with the status taken from [`ErrorCode::status_code`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use folio_core::{CacheError, ConfigError, PermissionError, StorageError};
use folio_storage::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication (401)
    // ========================================================================
    /// No credential was presented
    AuthRequired,

    /// Credential signature, format or expiry check failed
    InvalidToken,

    // ========================================================================
    // Authorization (403)
    // ========================================================================
    /// Identity does not hold the role the route requires
    InsufficientRole,

    /// Identity holds none of the permissions the route requires
    InsufficientPermissions,

    /// Permission check failed and the identity does not own the resource
    AccessDenied,

    // ========================================================================
    // Request Errors (400, 404)
    // ========================================================================
    InvalidInput,

    NotFound,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Backing store did not answer within the configured deadline
    Timeout,

    /// Backing store reported a failure
    DatabaseError,

    /// Distributed cache is unreachable
    CacheUnavailable,

    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,

            ErrorCode::InsufficientRole
            | ErrorCode::InsufficientPermissions
            | ErrorCode::AccessDenied => StatusCode::FORBIDDEN,

            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::CacheUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "Authentication required",
            ErrorCode::InvalidToken => "Invalid or expired token",
            ErrorCode::InsufficientRole => "Insufficient role",
            ErrorCode::InsufficientPermissions => "Insufficient permissions",
            ErrorCode::AccessDenied => "Access denied",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::NotFound => "Not found",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::CacheUnavailable => "Cache temporarily unavailable",
            ErrorCode::InternalError => "Internal server error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::InsufficientRole => "INSUFFICIENT_ROLE",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    #[serde(rename = "error")]
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthRequired, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn insufficient_role(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientRole, message)
    }

    pub fn insufficient_permissions(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientPermissions, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AccessDenied, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a NotFound error for one entity.
    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheUnavailable, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Map an executor failure for a client.
    ///
    /// Backing-store messages can carry SQL and driver internals, so they are
    /// only passed through in development. Elsewhere they are logged and the
    /// client gets the generic message for the code.
    pub fn from_query_error(err: QueryError, expose_details: bool) -> Self {
        match err {
            QueryError::Timeout { timeout_ms } => {
                Self::timeout(format!("Query timed out after {}ms", timeout_ms))
            }
            QueryError::BackingStore { message } => {
                if expose_details {
                    Self::database_error(message)
                } else {
                    tracing::error!(error = %message, "Database error");
                    Self::from_code(ErrorCode::InternalError)
                }
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    #[serde(flatten)]
    error: &'a ApiError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            success: false,
            error: &self,
        });
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Configuration error: {}", err))
    }
}

impl From<PermissionError> for ApiError {
    fn from(err: PermissionError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!("Storage error: {:?}", err);
        match err {
            StorageError::ConnectionFailed { reason } => {
                ApiError::database_error(format!("Failed to acquire database connection: {}", reason))
            }
            _ => ApiError::database_error("Database operation failed"),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::warn!("Cache error: {:?}", err);
        ApiError::cache_unavailable(err.to_string())
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::AuthRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::InsufficientRole.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::InsufficientPermissions.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ErrorCode::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_code_names_match_serde() -> Result<(), serde_json::Error> {
        for code in [
            ErrorCode::AuthRequired,
            ErrorCode::InvalidToken,
            ErrorCode::InsufficientRole,
            ErrorCode::InsufficientPermissions,
            ErrorCode::AccessDenied,
            ErrorCode::CacheUnavailable,
        ] {
            assert_eq!(serde_json::to_value(code)?, serde_json::json!(code.as_str()));
        }
        Ok(())
    }

    #[test]
    fn test_response_body_shape() -> Result<(), serde_json::Error> {
        let err = ApiError::insufficient_permissions("Requires posts:update");
        let body = serde_json::to_value(ErrorBody {
            success: false,
            error: &err,
        })?;
        assert_eq!(
            body,
            serde_json::json!({
                "success": false,
                "code": "INSUFFICIENT_PERMISSIONS",
                "error": "Requires posts:update",
            })
        );
        Ok(())
    }

    #[test]
    fn test_query_error_hidden_outside_development() {
        let err = QueryError::BackingStore {
            message: "relation \"posts\" does not exist".to_string(),
        };

        let dev = ApiError::from_query_error(err.clone(), true);
        assert_eq!(dev.code, ErrorCode::DatabaseError);
        assert!(dev.message.contains("relation"));

        let prod = ApiError::from_query_error(err, false);
        assert_eq!(prod.code, ErrorCode::InternalError);
        assert!(!prod.message.contains("relation"));
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = ApiError::from_query_error(QueryError::Timeout { timeout_ms: 250 }, false);
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.message.contains("250"));
    }
}
