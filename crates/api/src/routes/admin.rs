//! Admin routes
//!
//! Every handler takes [`AdminUser`], which re-reads the caller's admin flag
//! from storage on each request.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::auth::{json_body, parse_user_id, UserResponse};
use crate::{
    auth::AdminUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

/// Mark a user as approved
pub async fn approve(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let user_id = parse_user_id(&user_id)?;

    let user = state
        .store
        .set_approved(user_id, true)
        .await?
        .ok_or(ApiError::NotFound)?;

    tracing::info!(admin_id = %admin.user.id, user_id = %user.id, "User approved");
    Ok(Json(UserResponse::from(&user)))
}

/// Grant admin, or revoke it with `{"isAdmin": false}`
///
/// Only an empty body means grant. Any body that is present must parse.
pub async fn set_admin(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(user_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<UserResponse>> {
    let user_id = parse_user_id(&user_id)?;
    let is_admin = if body.is_empty() {
        true
    } else {
        json_body(Json::<SetAdminRequest>::from_bytes(&body))?.is_admin
    };

    if !is_admin && user_id == admin.user.id {
        return Err(ApiError::BadRequest(
            "Admins cannot revoke their own admin flag".to_string(),
        ));
    }

    let user = state
        .store
        .set_admin(user_id, is_admin)
        .await?
        .ok_or(ApiError::NotFound)?;

    tracing::info!(
        admin_id = %admin.user.id,
        user_id = %user.id,
        is_admin,
        "Admin flag updated"
    );
    Ok(Json(UserResponse::from(&user)))
}
