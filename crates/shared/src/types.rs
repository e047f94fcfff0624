//! Common types used across Beacon services

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// External identity provider a user can sign in with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Twitter,
    Github,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Twitter, ProviderKind::Github];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Github => "github",
        }
    }

    /// Human readable name used in user-facing messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Twitter => "Twitter",
            Self::Github => "GitHub",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Self::Twitter),
            "github" => Ok(Self::Github),
            _ => Err(format!("Unknown identity provider: {}", s)),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// A linked external identity (one row of `user_identities`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProviderIdentity {
    pub provider: ProviderKind,
    /// The provider's stable user id (never the handle, handles can change)
    pub external_id: String,
    /// Handle at the time the identity was linked
    pub external_handle: String,
}

/// Local user record
///
/// Invariant: at least one of `password_hash` or `identities` is present.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    /// Stored lowercased; unique case-insensitively when present
    pub email: Option<String>,
    pub username: String,
    pub password_hash: Option<String>,
    pub is_approved: bool,
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
    #[sqlx(skip)]
    pub identities: Vec<ProviderIdentity>,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// True when the user can still authenticate somehow
    pub fn has_auth_method(&self) -> bool {
        self.has_password() || !self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trips_through_str() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>(), Ok(kind));
        }
        assert_eq!("GitHub".parse::<ProviderKind>(), Ok(ProviderKind::Github));
        assert_eq!("x".parse::<ProviderKind>(), Ok(ProviderKind::Twitter));
        assert!("google".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_user_auth_methods() {
        let mut user = User {
            id: Uuid::new_v4(),
            email: None,
            username: "abc".to_string(),
            password_hash: None,
            is_approved: true,
            is_admin: false,
            created_at: OffsetDateTime::now_utc(),
            identities: vec![],
        };
        assert!(!user.has_auth_method());

        user.identities.push(ProviderIdentity {
            provider: ProviderKind::Github,
            external_id: "42".to_string(),
            external_handle: "octo".to_string(),
        });
        assert!(user.has_auth_method());
    }
}
