//! OAuth login flow
//!
//! `begin` covers INIT: a PKCE pair is stored server-side and the user gets an
//! authorization URL plus the opaque state. Waiting for the callback happens
//! on the client. `complete` runs the callback: state check, code exchange,
//! profile fetch, provisioning and session issuance, stopping at the first
//! failure.

use beacon_auth_shared::User;

use super::{OAuthError, OAuthProvider};
use crate::auth::{
    AccountProvisioner, JwtError, PkceStateStore, ProvisionError, SessionTokenIssuer,
};

/// Where a flow failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Callback,
    Exchanging,
    Provisioning,
    Issuing,
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FlowStage::Callback => "callback",
            FlowStage::Exchanging => "exchanging",
            FlowStage::Provisioning => "provisioning",
            FlowStage::Issuing => "issuing",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthFlowError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid or expired OAuth state")]
    InvalidState,
    #[error("Code exchange failed: {0}")]
    ExchangeFailed(OAuthError),
    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(OAuthError),
    #[error("Provisioning failed: {0}")]
    Provisioning(ProvisionError),
    #[error("Session issuance failed: {0}")]
    Session(JwtError),
}

impl OAuthFlowError {
    pub fn stage(&self) -> FlowStage {
        match self {
            Self::MissingParameter(_) | Self::InvalidState => FlowStage::Callback,
            Self::ExchangeFailed(_) | Self::ProfileFetchFailed(_) => FlowStage::Exchanging,
            Self::Provisioning(_) => FlowStage::Provisioning,
            Self::Session(_) => FlowStage::Issuing,
        }
    }
}

/// What the client needs to send the user to the provider
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub state: String,
}

/// Successful end of a flow
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub token: String,
    pub user: User,
    pub is_new_user: bool,
}

pub fn begin(provider: &dyn OAuthProvider, pkce: &PkceStateStore) -> AuthorizationRequest {
    let challenge = pkce.begin(provider.kind());
    tracing::debug!(provider = %provider.kind(), "OAuth flow started");

    AuthorizationRequest {
        auth_url: provider.authorization_url(&challenge.state, &challenge.code_challenge),
        state: challenge.state,
    }
}

pub async fn complete(
    provider: &dyn OAuthProvider,
    code: Option<&str>,
    state: Option<&str>,
    pkce: &PkceStateStore,
    provisioner: &AccountProvisioner,
    sessions: &SessionTokenIssuer,
) -> Result<CompletedLogin, OAuthFlowError> {
    let kind = provider.kind();
    let result = run_callback(provider, code, state, pkce, provisioner, sessions).await;

    if let Err(e) = &result {
        tracing::warn!(provider = %kind, stage = %e.stage(), error = %e, "OAuth flow failed");
    }
    result
}

async fn run_callback(
    provider: &dyn OAuthProvider,
    code: Option<&str>,
    state: Option<&str>,
    pkce: &PkceStateStore,
    provisioner: &AccountProvisioner,
    sessions: &SessionTokenIssuer,
) -> Result<CompletedLogin, OAuthFlowError> {
    let code = code
        .filter(|c| !c.is_empty())
        .ok_or(OAuthFlowError::MissingParameter("code"))?;
    let state = state
        .filter(|s| !s.is_empty())
        .ok_or(OAuthFlowError::MissingParameter("state"))?;

    let code_verifier = pkce
        .consume(state, provider.kind())
        .map_err(|_| OAuthFlowError::InvalidState)?;

    let access_token = provider
        .exchange_code(code, &code_verifier)
        .await
        .map_err(OAuthFlowError::ExchangeFailed)?;

    let profile = provider
        .fetch_profile(&access_token)
        .await
        .map_err(OAuthFlowError::ProfileFetchFailed)?;

    let account = provisioner
        .provision_oauth_account(provider.kind(), &profile)
        .await
        .map_err(OAuthFlowError::Provisioning)?;

    let token = sessions
        .issue(&account.user)
        .map_err(OAuthFlowError::Session)?;

    tracing::info!(
        user_id = %account.user.id,
        provider = %provider.kind(),
        is_new_user = account.is_new_user,
        "OAuth login completed"
    );

    Ok(CompletedLogin {
        token,
        user: account.user,
        is_new_user: account.is_new_user,
    })
}
