//! In-memory user store for tests and local development

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_auth_shared::{ProviderIdentity, ProviderKind, User};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{NewOAuthUser, NewPasswordUser, StoreError, UniqueConstraint, UserStore};

/// Mutex-guarded user table enforcing the same unique constraints as the
/// Postgres schema. Every insert checks and writes under one lock, so it is
/// as atomic as a database transaction.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, User>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn find<F>(&self, predicate: F) -> Option<User>
    where
        F: Fn(&User) -> bool,
    {
        self.lock().values().find(|u| predicate(u)).cloned()
    }

    fn check_unique(
        users: &HashMap<Uuid, User>,
        username: &str,
        email: Option<&str>,
        identity: Option<(ProviderKind, &str)>,
    ) -> Result<(), StoreError> {
        for existing in users.values() {
            if let Some((provider, external_id)) = identity {
                if existing
                    .identities
                    .iter()
                    .any(|i| i.provider == provider && i.external_id == external_id)
                {
                    return Err(StoreError::UniqueViolation(UniqueConstraint::ProviderIdentity));
                }
            }
            if existing.username == username {
                return Err(StoreError::UniqueViolation(UniqueConstraint::Username));
            }
            if let (Some(a), Some(b)) = (email, existing.email.as_deref()) {
                if a.eq_ignore_ascii_case(b) {
                    return Err(StoreError::UniqueViolation(UniqueConstraint::Email));
                }
            }
        }
        Ok(())
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Option<User>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.lock();
        let user = users.get_mut(&id)?;
        apply(user);
        Some(user.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| {
            u.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| u.username == username))
    }

    async fn find_by_identity(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| {
            u.identities
                .iter()
                .any(|i| i.provider == provider && i.external_id == external_id)
        }))
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.lock().values().any(|u| u.username == username))
    }

    async fn insert_password_user(&self, new_user: NewPasswordUser) -> Result<User, StoreError> {
        let mut users = self.lock();
        Self::check_unique(&users, &new_user.username, Some(&new_user.email), None)?;

        let user = User {
            id: Uuid::new_v4(),
            email: Some(new_user.email.to_lowercase()),
            username: new_user.username,
            password_hash: Some(new_user.password_hash),
            is_approved: true,
            is_admin: new_user.is_admin,
            created_at: OffsetDateTime::now_utc(),
            identities: Vec::new(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_oauth_user(&self, new_user: NewOAuthUser) -> Result<User, StoreError> {
        let mut users = self.lock();
        Self::check_unique(
            &users,
            &new_user.username,
            new_user.email.as_deref(),
            Some((new_user.provider, &new_user.external_id)),
        )?;

        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email.map(|e| e.to_lowercase()),
            username: new_user.username,
            password_hash: None,
            is_approved: true,
            is_admin: new_user.is_admin,
            created_at: OffsetDateTime::now_utc(),
            identities: vec![ProviderIdentity {
                provider: new_user.provider,
                external_id: new_user.external_id,
                external_handle: new_user.external_handle,
            }],
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Option<User>, StoreError> {
        Ok(self.update(id, |u| u.is_approved = approved))
    }

    async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<Option<User>, StoreError> {
        Ok(self.update(id, |u| u.is_admin = is_admin))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_user(email: &str, username: &str) -> NewPasswordUser {
        NewPasswordUser {
            email: email.to_string(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            is_admin: false,
        }
    }

    fn oauth_user(username: &str, external_id: &str) -> NewOAuthUser {
        NewOAuthUser {
            email: None,
            username: username.to_string(),
            is_admin: false,
            provider: ProviderKind::Github,
            external_id: external_id.to_string(),
            external_handle: username.to_string(),
        }
    }

    #[tokio::test]
    async fn test_email_unique_case_insensitively() {
        let store = MemoryUserStore::new();
        store
            .insert_password_user(password_user("a@b.com", "abc"))
            .await
            .unwrap();

        let err = store
            .insert_password_user(password_user("A@B.COM", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(UniqueConstraint::Email)));
        assert!(store.find_by_email("A@b.Com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_username_unique_exactly() {
        let store = MemoryUserStore::new();
        store.insert_oauth_user(oauth_user("alice", "1")).await.unwrap();

        let err = store
            .insert_oauth_user(oauth_user("alice", "2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation(UniqueConstraint::Username)
        ));

        // Different case is a different username
        store.insert_oauth_user(oauth_user("Alice", "2")).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_identity_unique_per_provider() {
        let store = MemoryUserStore::new();
        store.insert_oauth_user(oauth_user("alice", "42")).await.unwrap();

        let err = store
            .insert_oauth_user(oauth_user("alice2", "42"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation(UniqueConstraint::ProviderIdentity)
        ));

        let mut twitter = oauth_user("alice3", "42");
        twitter.provider = ProviderKind::Twitter;
        store.insert_oauth_user(twitter).await.unwrap();

        let found = store
            .find_by_identity(ProviderKind::Github, "42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.username, "alice");
    }

    #[tokio::test]
    async fn test_flag_updates() {
        let store = MemoryUserStore::new();
        let user = store
            .insert_password_user(password_user("a@b.com", "abc"))
            .await
            .unwrap();
        assert!(user.is_approved);
        assert!(!user.is_admin);

        let updated = store.set_admin(user.id, true).await.unwrap().unwrap();
        assert!(updated.is_admin);
        let updated = store.set_approved(user.id, false).await.unwrap().unwrap();
        assert!(!updated.is_approved);

        assert!(store.set_admin(Uuid::new_v4(), true).await.unwrap().is_none());
    }
}
