//! User persistence
//!
//! Uniqueness (username, case-insensitive email, provider identity) is
//! enforced by the backend itself. Callers must be ready for any insert to
//! fail with [`StoreError::UniqueViolation`] even after a successful
//! existence check.

mod memory;
mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

use async_trait::async_trait;
use beacon_auth_shared::{ProviderKind, User};
use uuid::Uuid;

/// Which uniqueness rule an insert tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    Username,
    Email,
    ProviderIdentity,
}

impl UniqueConstraint {
    /// Map a Postgres constraint (or unique index) name
    pub fn from_constraint_name(name: &str) -> Option<Self> {
        match name {
            "users_username_key" => Some(Self::Username),
            "users_email_lower_key" => Some(Self::Email),
            "user_identities_provider_external_id_key" => Some(Self::ProviderIdentity),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0:?}")]
    UniqueViolation(UniqueConstraint),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            // PostgreSQL unique violation
            if db_err.code().as_deref() == Some("23505") {
                if let Some(constraint) = db_err
                    .constraint()
                    .and_then(UniqueConstraint::from_constraint_name)
                {
                    return StoreError::UniqueViolation(constraint);
                }
            }
            tracing::error!(
                code = ?db_err.code(),
                message = db_err.message(),
                table = ?db_err.table(),
                constraint = ?db_err.constraint(),
                "Database query failed"
            );
        }
        StoreError::Backend(err.to_string())
    }
}

/// A password account to create
#[derive(Debug, Clone)]
pub struct NewPasswordUser {
    /// Already lowercased
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

/// An OAuth account to create, together with its first linked identity
#[derive(Debug, Clone)]
pub struct NewOAuthUser {
    pub email: Option<String>,
    pub username: String,
    pub is_admin: bool,
    pub provider: ProviderKind,
    pub external_id: String,
    pub external_handle: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_identity(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn insert_password_user(&self, new_user: NewPasswordUser) -> Result<User, StoreError>;

    /// Create the user row and identity row atomically: either both exist
    /// afterwards or neither does.
    async fn insert_oauth_user(&self, new_user: NewOAuthUser) -> Result<User, StoreError>;

    /// Returns the updated user, or `None` if no such user exists
    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Option<User>, StoreError>;

    /// Returns the updated user, or `None` if no such user exists
    async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<Option<User>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
