//! Password authentication routes

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use beacon_auth_shared::{ProviderKind, User};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Either `email` or `username` identifies the account
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
}

/// Public view of a user. Never includes the password hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub is_approved: bool,
    pub is_admin: bool,
    pub providers: Vec<ProviderKind>,
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            is_approved: user.is_approved,
            is_admin: user.is_admin,
            providers: user.identities.iter().map(|i| i.provider).collect(),
            created_at: user.created_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub user_id: Uuid,
    pub is_approved: bool,
    pub is_admin: bool,
}

/// Parse a user id path segment, answering 400 rather than axum's plain-text
/// rejection
pub(crate) fn parse_user_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("Invalid user id".to_string()))
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a password account
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let req = json_body(payload)?;

    let user = state
        .provisioner
        .provision_password_account(&req.email, req.username.trim(), &req.password)
        .await?;

    let token = state.sessions.issue(&user)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            user: UserResponse::from(&user),
        }),
    ))
}

/// Log in with email or username and password
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let req = json_body(payload)?;

    let email = req.email.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let username = req.username.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let user = match (email, username) {
        (Some(email), _) => state.store.find_by_email(email).await?,
        (None, Some(username)) => state.store.find_by_username(username).await?,
        (None, None) => {
            return Err(ApiError::Validation(
                "Email or username is required".to_string(),
            ))
        }
    };

    // Same amount of hashing work whether or not the account exists
    let verified = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
        Some(hash) => state.hasher.verify(&req.password, hash).await,
        None => state.hasher.verify_against_dummy(&req.password).await,
    };

    let user = match user {
        Some(user) if verified => user,
        _ => {
            tracing::info!("login: invalid credentials");
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !user.is_approved {
        tracing::info!(user_id = %user.id, "login: account pending approval");
        return Err(ApiError::AccountPendingApproval);
    }

    let token = state.sessions.issue(&user)?;
    tracing::info!(user_id = %user.id, "login: success");

    Ok(Json(SessionResponse {
        token,
        user: UserResponse::from(&user),
    }))
}

/// Approval and admin flags for a user
pub async fn status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let user_id = parse_user_id(&user_id)?;
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(StatusResponse {
        user_id: user.id,
        is_approved: user.is_approved,
        is_admin: user.is_admin,
    }))
}

/// The caller's live user record
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<UserResponse>> {
    let user = state
        .store
        .find_by_id(auth.claims.sub)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(UserResponse::from(&user)))
}
