//! Email and username shape rules

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 30;
pub const EMAIL_MAX_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Email is required")]
    EmailRequired,
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Username must be 3-30 characters")]
    UsernameLength,
    #[error("Username may only contain letters, numbers and underscores")]
    UsernameCharacters,
}

pub fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(ValidationError::UsernameLength);
    }
    if !username.chars().all(is_username_char) {
        return Err(ValidationError::UsernameCharacters);
    }
    Ok(())
}

/// Check the email's shape and return it trimmed and lowercased
pub fn normalize_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::EmailRequired);
    }
    if email.len() > EMAIL_MAX_LEN || email.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmail);
    }

    let (local, domain) = email.split_once('@').ok_or(ValidationError::InvalidEmail)?;
    if local.is_empty() || domain.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let bad_label = |l: &&str| l.is_empty() || l.starts_with('-') || l.ends_with('-');
    if labels.len() < 2 || labels.iter().any(bad_label) {
        return Err(ValidationError::InvalidEmail);
    }
    let tld = labels.last().copied().unwrap_or_default();
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidEmail);
    }

    Ok(email.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usernames() {
        assert!(validate_username("abc").is_ok());
        assert!(validate_username("Alice_99").is_ok());
        assert!(validate_username(&"a".repeat(30)).is_ok());

        assert_eq!(validate_username("ab"), Err(ValidationError::UsernameLength));
        assert_eq!(
            validate_username(&"a".repeat(31)),
            Err(ValidationError::UsernameLength)
        );
        assert_eq!(
            validate_username("bad-name"),
            Err(ValidationError::UsernameCharacters)
        );
        assert_eq!(
            validate_username("héllo"),
            Err(ValidationError::UsernameCharacters)
        );
    }

    #[test]
    fn test_emails() {
        assert_eq!(normalize_email(" A@B.com ").unwrap(), "a@b.com");
        assert!(normalize_email("first.last+tag@sub.example.org").is_ok());

        for bad in [
            "plainaddress",
            "@example.com",
            "a@b",
            "a@b.c",
            "a@@b.com",
            "a@b..com",
            "a b@c.com",
            "a@-b.com",
            "a@b.c0m",
        ] {
            assert_eq!(
                normalize_email(bad),
                Err(ValidationError::InvalidEmail),
                "{} should be rejected",
                bad
            );
        }
        assert_eq!(normalize_email("  "), Err(ValidationError::EmailRequired));
    }
}
