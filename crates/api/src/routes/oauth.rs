//! OAuth sign-in routes

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use beacon_auth_shared::ProviderKind;
use serde::{Deserialize, Serialize};

use super::auth::{json_body, UserResponse};
use crate::{
    error::{ApiError, ApiResult},
    oauth::{flow, OAuthProvider},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub auth_url: String,
    pub state: String,
}

/// Both fields are optional so a missing one is reported by name
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub token: String,
    pub user: UserResponse,
    pub is_new_user: bool,
}

fn resolve_provider(state: &AppState, raw: &str) -> ApiResult<Arc<dyn OAuthProvider>> {
    let kind: ProviderKind = raw.parse().map_err(|_| ApiError::NotFound)?;
    state
        .providers
        .get(kind)
        .ok_or(ApiError::ProviderNotConfigured(kind))
}

/// Start a sign-in: returns the provider URL and the state to echo back
pub async fn init(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Json<InitResponse>> {
    let provider = resolve_provider(&state, &provider)?;
    let request = flow::begin(provider.as_ref(), &state.pkce);

    Ok(Json(InitResponse {
        auth_url: request.auth_url,
        state: request.state,
    }))
}

/// Finish a sign-in with the code and state the provider redirected with
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> ApiResult<Json<CallbackResponse>> {
    let provider = resolve_provider(&state, &provider)?;
    let req = json_body(payload)?;

    let login = flow::complete(
        provider.as_ref(),
        req.code.as_deref(),
        req.state.as_deref(),
        &state.pkce,
        &state.provisioner,
        &state.sessions,
    )
    .await?;

    Ok(Json(CallbackResponse {
        token: login.token,
        user: UserResponse::from(&login.user),
        is_new_user: login.is_new_user,
    }))
}
