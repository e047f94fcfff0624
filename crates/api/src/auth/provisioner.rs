//! Account provisioning
//!
//! Resolves a password credential or an external identity to a local user,
//! creating one when needed. The store's unique constraints are the source of
//! truth: every existence check here is advisory, and a constraint violation
//! on insert is handled as ordinary control flow.

use std::collections::HashSet;
use std::sync::Arc;

use beacon_auth_shared::{ProviderKind, User};
use rand::Rng;

use super::password::{validate_password_strength, CredentialHasher, PasswordError};
use super::validation::{
    is_username_char, normalize_email, validate_username, USERNAME_MAX_LEN, USERNAME_MIN_LEN,
};
use crate::oauth::ProviderProfile;
use crate::store::{NewOAuthUser, NewPasswordUser, StoreError, UniqueConstraint, UserStore};

/// Numeric suffixes tried before falling back to random ones
pub const MAX_NUMERIC_SUFFIX: u32 = 100;

/// Random-suffix attempts after the numeric range is used up
const RANDOM_SUFFIX_ATTEMPTS: usize = 5;

/// Prefix for handles with too few usable characters
const FALLBACK_PREFIX: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Email already registered")]
    EmailTaken,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Could not find a free username for base '{base}'")]
    UsernameGenerationExhausted { base: String },
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ProvisionError {
    fn from(err: StoreError) -> Self {
        ProvisionError::Store(err)
    }
}

impl From<PasswordError> for ProvisionError {
    fn from(err: PasswordError) -> Self {
        ProvisionError::Hashing(err.to_string())
    }
}

/// Decides whether a newly created account starts out as an admin
pub trait AdminPreauthorization: Send + Sync {
    fn is_preauthorized(&self, email: &str) -> bool;
}

/// Nobody is pre-authorized
pub struct NoPreauthorization;

impl AdminPreauthorization for NoPreauthorization {
    fn is_preauthorized(&self, _email: &str) -> bool {
        false
    }
}

/// Exact, case-insensitive match against a fixed list of addresses
pub struct EmailAllowList {
    emails: HashSet<String>,
}

impl EmailAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }
}

impl AdminPreauthorization for EmailAllowList {
    fn is_preauthorized(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }
}

/// Result of an OAuth login
#[derive(Debug, Clone)]
pub struct ProvisionedAccount {
    pub user: User,
    pub is_new_user: bool,
}

#[derive(Clone)]
pub struct AccountProvisioner {
    store: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    admin_policy: Arc<dyn AdminPreauthorization>,
}

impl AccountProvisioner {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: CredentialHasher,
        admin_policy: Arc<dyn AdminPreauthorization>,
    ) -> Self {
        Self {
            store,
            hasher,
            admin_policy,
        }
    }

    pub async fn provision_password_account(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<User, ProvisionError> {
        let email =
            normalize_email(email).map_err(|e| ProvisionError::InvalidInput(e.to_string()))?;
        validate_username(username).map_err(|e| ProvisionError::InvalidInput(e.to_string()))?;
        validate_password_strength(password)
            .map_err(|e| ProvisionError::InvalidInput(e.to_string()))?;

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(ProvisionError::EmailTaken);
        }
        if self.store.username_exists(username).await? {
            return Err(ProvisionError::UsernameTaken);
        }

        let password_hash = self.hasher.hash(password).await?;
        let is_admin = self.admin_policy.is_preauthorized(&email);

        // The checks above may be stale by now; the insert has the final say
        let user = self
            .store
            .insert_password_user(NewPasswordUser {
                email,
                username: username.to_string(),
                password_hash,
                is_admin,
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(UniqueConstraint::Email) => ProvisionError::EmailTaken,
                StoreError::UniqueViolation(UniqueConstraint::Username) => {
                    ProvisionError::UsernameTaken
                }
                other => ProvisionError::Store(other),
            })?;

        debug_assert!(user.has_auth_method());
        tracing::info!(user_id = %user.id, is_admin, "Password account created");
        Ok(user)
    }

    pub async fn provision_oauth_account(
        &self,
        provider: ProviderKind,
        profile: &ProviderProfile,
    ) -> Result<ProvisionedAccount, ProvisionError> {
        if let Some(user) = self
            .store
            .find_by_identity(provider, &profile.external_id)
            .await?
        {
            return Ok(ProvisionedAccount {
                user,
                is_new_user: false,
            });
        }

        // An unusable provider email is dropped rather than failing the login
        let mut email = profile
            .email
            .as_deref()
            .and_then(|e| normalize_email(e).ok());

        let base = sanitize_handle(&profile.handle);

        for candidate in username_candidates(&base) {
            if self.store.username_exists(&candidate).await? {
                continue;
            }

            loop {
                let is_admin = email
                    .as_deref()
                    .is_some_and(|e| self.admin_policy.is_preauthorized(e));

                let attempt = self
                    .store
                    .insert_oauth_user(NewOAuthUser {
                        email: email.clone(),
                        username: candidate.clone(),
                        is_admin,
                        provider,
                        external_id: profile.external_id.clone(),
                        external_handle: profile.handle.clone(),
                    })
                    .await;

                match attempt {
                    Ok(user) => {
                        debug_assert!(user.has_auth_method());
                        tracing::info!(
                            user_id = %user.id,
                            provider = %provider,
                            username = %user.username,
                            "OAuth account created"
                        );
                        return Ok(ProvisionedAccount {
                            user,
                            is_new_user: true,
                        });
                    }
                    Err(StoreError::UniqueViolation(UniqueConstraint::Username)) => {
                        tracing::debug!(
                            provider = %provider,
                            candidate = %candidate,
                            "Username taken during insert, trying next candidate"
                        );
                        break;
                    }
                    Err(StoreError::UniqueViolation(UniqueConstraint::ProviderIdentity)) => {
                        return self.converge_on_existing(provider, &profile.external_id).await;
                    }
                    Err(StoreError::UniqueViolation(UniqueConstraint::Email)) => {
                        // Never attach an external identity to someone else's
                        // account based on email alone
                        tracing::info!(
                            provider = %provider,
                            "Provider email belongs to another account, creating without email"
                        );
                        email = None;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Err(ProvisionError::UsernameGenerationExhausted { base })
    }

    /// A concurrent request created the account for this identity first
    async fn converge_on_existing(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<ProvisionedAccount, ProvisionError> {
        tracing::info!(
            provider = %provider,
            "Identity created concurrently, returning existing account"
        );

        match self.store.find_by_identity(provider, external_id).await? {
            Some(user) => Ok(ProvisionedAccount {
                user,
                is_new_user: false,
            }),
            None => Err(ProvisionError::Store(StoreError::Backend(
                "identity reported as duplicate but not found".to_string(),
            ))),
        }
    }
}

/// Reduce a provider handle to a valid username base
pub fn sanitize_handle(handle: &str) -> String {
    let cleaned: String = handle
        .chars()
        .filter(|c| is_username_char(*c))
        .take(USERNAME_MAX_LEN)
        .collect();

    if cleaned.len() >= USERNAME_MIN_LEN {
        return cleaned;
    }

    format!("{}{}", FALLBACK_PREFIX, cleaned)
}

/// `base` with `suffix` appended, truncating `base` so the result fits
pub fn with_suffix(base: &str, suffix: &str) -> String {
    let room = USERNAME_MAX_LEN.saturating_sub(suffix.len());
    let truncated: String = base.chars().take(room).collect();
    format!("{}{}", truncated, suffix)
}

/// Usernames to try in order: the base, numbered variants, then a few
/// random ones. Finite, so provisioning can't spin forever.
pub fn username_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    let numbered = (1..=MAX_NUMERIC_SUFFIX).map(move |n| with_suffix(base, &n.to_string()));
    let random = (0..RANDOM_SUFFIX_ATTEMPTS).map(move |_| {
        let n: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
        with_suffix(base, &n.to_string())
    });

    std::iter::once(base.to_string()).chain(numbered).chain(random)
}
