//! Session token issuance and verification

use beacon_auth_shared::User;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Claims carried by a Beacon session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub username: String,
    pub is_admin: bool,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Mints and verifies signed, expiring session tokens (HS256)
#[derive(Clone)]
pub struct SessionTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl SessionTokenIssuer {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, JwtError> {
        self.issue_at(user, OffsetDateTime::now_utc())
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(&self, user: &User, now: OffsetDateTime) -> Result<String, JwtError> {
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
            iat: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
        };

        // Explicit algorithm prevents algorithm confusion attacks
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Verify signature and expiry against the supplied clock.
    ///
    /// Expiry is checked here rather than by `jsonwebtoken` so the clock can
    /// be injected; a token is valid up to and including its `exp` second.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| JwtError::Invalid)?;

        if now.unix_timestamp() > claims.exp {
            return Err(JwtError::Expired);
        }

        Ok(claims)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token encoding error: {0}")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-that-is-at-least-32-characters-long";

    fn user(is_admin: bool) -> User {
        User {
            id: Uuid::new_v4(),
            email: Some("a@b.com".to_string()),
            username: "abc".to_string(),
            password_hash: None,
            is_approved: true,
            is_admin,
            created_at: OffsetDateTime::now_utc(),
            identities: Vec::new(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = SessionTokenIssuer::new(SECRET, 24 * 7);
        let user = user(true);

        let token = issuer.issue(&user).unwrap();
        let claims = issuer.verify(&token).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "abc");
        assert!(claims.is_admin);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 3600);
    }

    #[test]
    fn test_expires_after_seven_days() {
        let issuer = SessionTokenIssuer::new(SECRET, 24 * 7);
        let issued = OffsetDateTime::now_utc();
        let token = issuer.issue_at(&user(false), issued).unwrap();

        assert!(issuer.verify_at(&token, issued).is_ok());
        assert!(issuer.verify_at(&token, issued + Duration::days(7)).is_ok());
        assert!(matches!(
            issuer.verify_at(&token, issued + Duration::days(7) + Duration::seconds(1)),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_malformed_and_foreign_tokens_are_invalid() {
        let issuer = SessionTokenIssuer::new(SECRET, 24);
        assert!(matches!(issuer.verify("not.a.jwt"), Err(JwtError::Invalid)));
        assert!(matches!(issuer.verify(""), Err(JwtError::Invalid)));

        let other = SessionTokenIssuer::new("another-secret-key-that-is-32-characters-long", 24);
        let token = other.issue(&user(true)).unwrap();
        assert!(matches!(issuer.verify(&token), Err(JwtError::Invalid)));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let issuer = SessionTokenIssuer::new(SECRET, 24);
        let token = issuer.issue(&user(false)).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = issuer.issue(&user(true)).unwrap();
        let forged_payload = forged.split('.').nth(1).unwrap();
        parts[1] = forged_payload;

        assert!(matches!(
            issuer.verify(&parts.join(".")),
            Err(JwtError::Invalid)
        ));
    }
}
