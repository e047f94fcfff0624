//! Postgres-backed user store

use async_trait::async_trait;
use beacon_auth_shared::{ProviderIdentity, ProviderKind, User};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewOAuthUser, NewPasswordUser, StoreError, UserStore};

const USER_COLUMNS: &str =
    "id, email, username, password_hash, is_approved, is_admin, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_identities(&self, user: Option<User>) -> Result<Option<User>, StoreError> {
        let Some(mut user) = user else {
            return Ok(None);
        };

        user.identities = sqlx::query_as::<_, ProviderIdentity>(
            r#"
            SELECT provider, external_id, external_handle
            FROM user_identities
            WHERE user_id = $1
            ORDER BY linked_at
            "#,
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(user))
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        self.with_identities(user).await
    }

    async fn update_flag(
        &self,
        id: Uuid,
        column: &str,
        value: bool,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET {} = $2 WHERE id = $1 RETURNING {}",
            column, USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        self.with_identities(user).await
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.with_identities(user).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("LOWER(email) = LOWER($1)", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("username = $1", username).await
    }

    async fn find_by_identity(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.username, u.password_hash,
                   u.is_approved, u.is_admin, u.created_at
            FROM users u
            JOIN user_identities i ON i.user_id = u.id
            WHERE i.provider = $1 AND i.external_id = $2
            "#,
        )
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        self.with_identities(user).await
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_password_user(&self, new_user: NewPasswordUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, username, password_hash, is_approved, is_admin)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_user.email.to_lowercase())
            .bind(&new_user.username)
            .bind(&new_user.password_hash)
            .bind(new_user.is_admin)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_oauth_user(&self, new_user: NewOAuthUser) -> Result<User, StoreError> {
        // Dropping the transaction on any error path rolls it back
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO users (id, email, username, password_hash, is_approved, is_admin)
            VALUES ($1, $2, $3, NULL, TRUE, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let mut user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_user.email.as_deref().map(str::to_lowercase))
            .bind(&new_user.username)
            .bind(new_user.is_admin)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_identities (id, user_id, provider, external_id, external_handle)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(new_user.provider)
        .bind(&new_user.external_id)
        .bind(&new_user.external_handle)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        user.identities = vec![ProviderIdentity {
            provider: new_user.provider,
            external_id: new_user.external_id,
            external_handle: new_user.external_handle,
        }];
        Ok(user)
    }

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Option<User>, StoreError> {
        self.update_flag(id, "is_approved", approved).await
    }

    async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<Option<User>, StoreError> {
        self.update_flag(id, "is_admin", is_admin).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UniqueConstraint;

    async fn store() -> PgUserStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = beacon_auth_shared::create_pool(&url, 2).await.unwrap();
        beacon_auth_shared::run_migrations(&pool).await.unwrap();
        PgUserStore::new(pool)
    }

    fn unique(prefix: &str) -> String {
        format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_constraint_violations_are_typed() {
        let store = store().await;
        let username = unique("pg");
        let email = format!("{}@example.com", username);

        store
            .insert_password_user(NewPasswordUser {
                email: email.clone(),
                username: username.clone(),
                password_hash: "hash".into(),
                is_admin: false,
            })
            .await
            .unwrap();

        let err = store
            .insert_password_user(NewPasswordUser {
                email: email.to_uppercase(),
                username: unique("pg"),
                password_hash: "hash".into(),
                is_admin: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(UniqueConstraint::Email)));

        let err = store
            .insert_password_user(NewPasswordUser {
                email: format!("{}@example.com", unique("pg")),
                username: username.clone(),
                password_hash: "hash".into(),
                is_admin: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation(UniqueConstraint::Username)
        ));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_oauth_insert_is_atomic() {
        let store = store().await;
        let external_id = unique("ext");
        let first = NewOAuthUser {
            email: None,
            username: unique("oa"),
            is_admin: false,
            provider: ProviderKind::Github,
            external_id: external_id.clone(),
            external_handle: "octo".into(),
        };
        let created = store.insert_oauth_user(first.clone()).await.unwrap();

        let duplicate = NewOAuthUser {
            username: unique("oa"),
            ..first
        };
        let orphan_username = duplicate.username.clone();
        let err = store.insert_oauth_user(duplicate).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation(UniqueConstraint::ProviderIdentity)
        ));

        // The user row from the failed attempt was rolled back
        assert!(!store.username_exists(&orphan_username).await.unwrap());

        let found = store
            .find_by_identity(ProviderKind::Github, &external_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.identities.len(), 1);
    }
}
