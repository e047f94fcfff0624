//! Password hashing with Argon2

use std::sync::{Arc, OnceLock};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Argon2id cost parameters.
///
/// The default (19 MiB, 2 passes, 1 lane) is the OWASP baseline and lands
/// around 100ms per hash on current server hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkFactor {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for WorkFactor {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl WorkFactor {
    /// Minimal cost, for tests only
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// One-way password hashing and verification.
///
/// Every hash gets a fresh random salt. Work runs on the blocking pool so a
/// slow hash never stalls the async runtime or sits under a lock.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
    dummy_hash: Arc<OnceLock<String>>,
}

impl CredentialHasher {
    pub fn new(work_factor: WorkFactor) -> Result<Self, PasswordError> {
        let params = Params::new(
            work_factor.memory_kib,
            work_factor.iterations,
            work_factor.parallelism,
            None,
        )
        .map_err(|e| PasswordError::Hashing(e.to_string()))?;

        Ok(Self {
            params,
            dummy_hash: Arc::new(OnceLock::new()),
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password on the current thread
    pub fn hash_blocking(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError::Hashing(e.to_string()))
    }

    /// Verify a password on the current thread.
    ///
    /// Malformed hashes verify as `false`. Cost parameters are read from the
    /// hash itself, so hashes made with an older work factor still verify.
    pub fn verify_blocking(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                false
            }
        }
    }

    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let hasher = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|e| PasswordError::Hashing(e.to_string()))?
    }

    pub async fn verify(&self, password: &str, hash: &str) -> bool {
        let hasher = self.clone();
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &hash))
            .await
            .unwrap_or(false)
    }

    /// Burn the same CPU as a real verification and return `false`.
    ///
    /// Used when the account does not exist or has no password, so response
    /// timing doesn't reveal which usernames are registered.
    pub async fn verify_against_dummy(&self, password: &str) -> bool {
        let hasher = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let dummy = hasher
                .dummy_hash
                .get_or_init(|| hasher.hash_blocking("dummy-password").unwrap_or_default());
            let _ = hasher.verify_blocking(&password, dummy);
            false
        })
        .await
        .unwrap_or(false)
    }
}

/// Validate password strength
pub fn validate_password_strength(password: &str) -> Result<(), PasswordValidationError> {
    // Length validation
    if password.chars().count() < 8 {
        return Err(PasswordValidationError::TooShort);
    }

    if password.len() > 128 {
        return Err(PasswordValidationError::TooLong);
    }

    // Character type validation
    let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_lowercase {
        return Err(PasswordValidationError::MissingLowercase);
    }

    if !has_uppercase {
        return Err(PasswordValidationError::MissingUppercase);
    }

    if !has_digit {
        return Err(PasswordValidationError::MissingDigit);
    }

    if is_common_password(password) {
        return Err(PasswordValidationError::TooCommon);
    }

    Ok(())
}

/// Check if password is in the common passwords list
fn is_common_password(password: &str) -> bool {
    let password_lower = password.to_lowercase();

    const COMMON_PASSWORDS: &[&str] = &[
        "password1",
        "password12",
        "password123",
        "password1234",
        "passw0rd",
        "qwerty123",
        "qwerty12345",
        "abcd1234",
        "abc12345",
        "welcome1",
        "welcome12",
        "welcome123",
        "admin123",
        "admin1234",
        "letmein1",
        "letmein123",
        "iloveyou1",
        "monkey123",
        "dragon123",
        "master123",
        "sunshine1",
        "princess1",
        "football1",
        "baseball1",
        "superman1",
        "trustno1",
        "1q2w3e4r",
        "1qaz2wsx",
        "zaq12wsx",
        "changeme1",
        "beacon123",
    ];

    COMMON_PASSWORDS.contains(&password_lower.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordValidationError {
    #[error("Password must be at least 8 characters")]
    TooShort,
    #[error("Password must be at most 128 characters")]
    TooLong,
    #[error("Password must contain at least one lowercase letter")]
    MissingLowercase,
    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,
    #[error("Password must contain at least one digit")]
    MissingDigit,
    #[error("This password is too common - please choose a unique password")]
    TooCommon,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(WorkFactor::insecure_fast()).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash_blocking("Abcdef12").unwrap();

        assert!(hasher.verify_blocking("Abcdef12", &hash));
        assert!(!hasher.verify_blocking("abcdef12", &hash));
    }

    #[test]
    fn test_each_hash_is_salted() {
        let hasher = hasher();
        let a = hasher.hash_blocking("Abcdef12").unwrap();
        let b = hasher.hash_blocking("Abcdef12").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_false_not_error() {
        let hasher = hasher();
        assert!(!hasher.verify_blocking("Abcdef12", "not-a-hash"));
        assert!(!hasher.verify_blocking("Abcdef12", ""));
    }

    #[test]
    fn test_verifies_hash_from_other_work_factor() {
        let strong = CredentialHasher::new(WorkFactor {
            memory_kib: 64,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let hash = strong.hash_blocking("Abcdef12").unwrap();
        assert!(hasher().verify_blocking("Abcdef12", &hash));
    }

    #[tokio::test]
    async fn test_async_hash_and_dummy_verify() {
        let hasher = hasher();
        let hash = hasher.hash("Abcdef12").await.unwrap();
        assert!(hasher.verify("Abcdef12", &hash).await);
        assert!(!hasher.verify_against_dummy("dummy-password").await);
    }

    #[test]
    fn test_invalid_work_factor_rejected() {
        let result = CredentialHasher::new(WorkFactor {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(matches!(
            validate_password_strength("Abc12"),
            Err(PasswordValidationError::TooShort)
        ));
        assert!(matches!(
            validate_password_strength("abcdef12"),
            Err(PasswordValidationError::MissingUppercase)
        ));
        assert!(matches!(
            validate_password_strength("ABCDEF12"),
            Err(PasswordValidationError::MissingLowercase)
        ));
        assert!(matches!(
            validate_password_strength("Abcdefgh"),
            Err(PasswordValidationError::MissingDigit)
        ));
        assert!(matches!(
            validate_password_strength("Password123"),
            Err(PasswordValidationError::TooCommon)
        ));
        assert!(matches!(
            validate_password_strength(&("A1".to_string() + &"a".repeat(127))),
            Err(PasswordValidationError::TooLong)
        ));

        assert!(validate_password_strength("Abcdef12").is_ok());
    }
}
