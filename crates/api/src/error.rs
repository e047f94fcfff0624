//! API error types and handling

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use beacon_auth_shared::ProviderKind;
use serde_json::json;

use crate::auth::jwt::JwtError;
use crate::auth::provisioner::ProvisionError;
use crate::oauth::flow::OAuthFlowError;
use crate::store::{StoreError, UniqueConstraint};

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid session token")]
    InvalidToken,
    #[error("Session expired, please log in again")]
    TokenExpired,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Account is pending approval")]
    AccountPendingApproval,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Email already registered")]
    EmailAlreadyExists,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Resource already exists")]
    Conflict(String),

    // Rate limiting
    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    // OAuth errors
    #[error("Invalid or expired OAuth state")]
    InvalidOAuthState,
    #[error("Could not complete sign-in with the identity provider")]
    OAuthExchangeFailed { client_caused: bool },
    #[error("Could not load your profile from the identity provider")]
    ProfileFetchFailed,
    #[error("{} sign-in is not configured", .0.display_name())]
    ProviderNotConfigured(ProviderKind),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::TokenExpired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            ApiError::AccountPendingApproval => (StatusCode::FORBIDDEN, "ACCOUNT_PENDING_APPROVAL", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::EmailAlreadyExists => (StatusCode::CONFLICT, "EMAIL_TAKEN", self.to_string()),
            ApiError::UsernameTaken => (StatusCode::CONFLICT, "USERNAME_TAKEN", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Rate limiting
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please try again in {} seconds.", retry_after_secs),
            ),

            // OAuth
            ApiError::InvalidOAuthState => (StatusCode::BAD_REQUEST, "INVALID_OAUTH_STATE", "Invalid or expired OAuth state. Please try signing in again.".to_string()),
            ApiError::OAuthExchangeFailed { client_caused: true } => (StatusCode::BAD_REQUEST, "OAUTH_EXCHANGE_FAILED", "Authorization code was rejected. Please try signing in again.".to_string()),
            ApiError::OAuthExchangeFailed { client_caused: false } => (StatusCode::BAD_GATEWAY, "OAUTH_EXCHANGE_FAILED", self.to_string()),
            ApiError::ProfileFetchFailed => (StatusCode::BAD_GATEWAY, "PROFILE_FETCH_FAILED", self.to_string()),
            ApiError::ProviderNotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_NOT_CONFIGURED", self.to_string()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(UniqueConstraint::Email) => ApiError::EmailAlreadyExists,
            StoreError::UniqueViolation(UniqueConstraint::Username) => ApiError::UsernameTaken,
            StoreError::UniqueViolation(UniqueConstraint::ProviderIdentity) => {
                ApiError::Conflict("Identity is already linked to another account".to_string())
            }
            StoreError::Backend(msg) => {
                tracing::error!(error = %msg, "User store failure");
                ApiError::Database(msg)
            }
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::InvalidInput(msg) => ApiError::Validation(msg),
            ProvisionError::EmailTaken => ApiError::EmailAlreadyExists,
            ProvisionError::UsernameTaken => ApiError::UsernameTaken,
            ProvisionError::UsernameGenerationExhausted { base } => {
                tracing::error!(base = %base, "Username generation exhausted");
                ApiError::Internal
            }
            ProvisionError::Hashing(msg) => {
                tracing::error!(error = %msg, "Password hashing failed");
                ApiError::Internal
            }
            ProvisionError::Store(e) => e.into(),
        }
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::TokenExpired,
            JwtError::Invalid => ApiError::InvalidToken,
            JwtError::Encoding(msg) => {
                tracing::error!(error = %msg, "Session token encoding failed");
                ApiError::Internal
            }
        }
    }
}

impl From<OAuthFlowError> for ApiError {
    fn from(err: OAuthFlowError) -> Self {
        match err {
            OAuthFlowError::MissingParameter(name) => {
                ApiError::Validation(format!("Missing required parameter: {}", name))
            }
            OAuthFlowError::InvalidState => ApiError::InvalidOAuthState,
            OAuthFlowError::ExchangeFailed(e) => ApiError::OAuthExchangeFailed {
                client_caused: e.is_client_error(),
            },
            OAuthFlowError::ProfileFetchFailed(_) => ApiError::ProfileFetchFailed,
            OAuthFlowError::Provisioning(e) => e.into(),
            OAuthFlowError::Session(e) => e.into(),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn error_response(err: ApiError) -> (StatusCode, Option<String>, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, retry_after, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_database_error_hides_details() {
        let (status, _, body) =
            error_response(ApiError::Database("connection refused at 10.0.0.5:5432".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "Database error");
        assert!(!body.to_string().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let (status, retry_after, body) =
            error_response(ApiError::RateLimited { retry_after_secs: 42 }).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(retry_after.as_deref(), Some("42"));
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_exchange_failure_status_depends_on_cause() {
        let (client, _, _) =
            error_response(ApiError::OAuthExchangeFailed { client_caused: true }).await;
        let (upstream, _, _) =
            error_response(ApiError::OAuthExchangeFailed { client_caused: false }).await;
        assert_eq!(client, StatusCode::BAD_REQUEST);
        assert_eq!(upstream, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_conflicts_are_distinguished() {
        let (status, _, body) = error_response(ApiError::EmailAlreadyExists).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "EMAIL_TAKEN");

        let (status, _, body) = error_response(ApiError::UsernameTaken).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "USERNAME_TAKEN");
    }

    #[tokio::test]
    async fn test_provider_not_configured_names_provider() {
        let (status, _, body) =
            error_response(ApiError::ProviderNotConfigured(ProviderKind::Github)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["message"], "GitHub sign-in is not configured");
    }

    #[test]
    fn test_store_violation_maps_to_typed_conflict() {
        assert!(matches!(
            ApiError::from(StoreError::UniqueViolation(UniqueConstraint::Email)),
            ApiError::EmailAlreadyExists
        ));
        assert!(matches!(
            ApiError::from(StoreError::UniqueViolation(UniqueConstraint::Username)),
            ApiError::UsernameTaken
        ));
    }
}
