//! Bearer-token extractors for authenticated and admin-only routes

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use beacon_auth_shared::User;

use super::jwt::{Claims, SessionTokenIssuer};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::UserStore;

/// Pull the token out of `Authorization: Bearer <token>`
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// A request carrying a valid session token.
///
/// Claims are trusted as of issuance only; anything privilege-sensitive must
/// go through [`AdminUser`] instead.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let claims = state.sessions.verify(token)?;
        Ok(AuthUser { claims })
    }
}

/// Verify a session token and confirm, against live storage, that its
/// holder is still an admin.
///
/// The `is_admin` claim only proves the user was an admin when the token was
/// issued. Sessions last days, so revocation is checked on every use.
pub async fn authorize_admin(
    sessions: &SessionTokenIssuer,
    store: &dyn UserStore,
    token: &str,
) -> Result<(Claims, User), ApiError> {
    let claims = sessions.verify(token)?;

    if !claims.is_admin {
        tracing::warn!(user_id = %claims.sub, "Non-admin token used on admin route");
        return Err(ApiError::Forbidden);
    }

    let user = store
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::Forbidden)?;

    if !user.is_admin {
        tracing::warn!(user_id = %user.id, "Admin token presented after privilege was revoked");
        return Err(ApiError::Forbidden);
    }

    Ok((claims, user))
}

/// A request from a user who is an admin right now
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub claims: Claims,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let (claims, user) = authorize_admin(&state.sessions, state.store.as_ref(), token).await?;
        Ok(AdminUser { claims, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryUserStore, NewPasswordUser};
    use axum::http::Request;
    use time::{Duration, OffsetDateTime};

    const SECRET: &str = "middleware-test-secret-with-32-plus-chars";

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn admin(store: &MemoryUserStore) -> User {
        store
            .insert_password_user(NewPasswordUser {
                email: "root@example.com".into(),
                username: "root".into(),
                password_hash: "x".into(),
                is_admin: true,
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }

    #[tokio::test]
    async fn test_live_admin_allowed() {
        let store = MemoryUserStore::new();
        let sessions = SessionTokenIssuer::new(SECRET, 168);
        let user = admin(&store).await;
        let token = sessions.issue(&user).unwrap();

        let (claims, live) = authorize_admin(&sessions, &store, &token).await.unwrap();
        assert_eq!(claims.sub, user.id);
        assert!(live.is_admin);
    }

    #[tokio::test]
    async fn test_revoked_admin_rejected_despite_claim() {
        let store = MemoryUserStore::new();
        let sessions = SessionTokenIssuer::new(SECRET, 168);
        let user = admin(&store).await;
        let token = sessions.issue(&user).unwrap();

        store.set_admin(user.id, false).await.unwrap();

        let err = authorize_admin(&sessions, &store, &token).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn test_non_admin_claim_rejected() {
        let store = MemoryUserStore::new();
        let sessions = SessionTokenIssuer::new(SECRET, 168);
        let mut user = admin(&store).await;
        user.is_admin = false;
        let token = sessions.issue(&user).unwrap();

        assert!(matches!(
            authorize_admin(&sessions, &store, &token).await,
            Err(ApiError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_reported_as_expired() {
        let store = MemoryUserStore::new();
        let sessions = SessionTokenIssuer::new(SECRET, 168);
        let user = admin(&store).await;
        let token = sessions
            .issue_at(&user, OffsetDateTime::now_utc() - Duration::days(8))
            .unwrap();

        assert!(matches!(
            authorize_admin(&sessions, &store, &token).await,
            Err(ApiError::TokenExpired)
        ));
    }
}
