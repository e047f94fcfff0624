//! Application configuration

use std::env;
use std::time::Duration;

use beacon_auth_shared::ProviderKind;

/// Default session lifetime (7 days)
const DEFAULT_SESSION_TTL_HOURS: i64 = 24 * 7;

/// Default PKCE state lifetime (10 minutes)
const DEFAULT_OAUTH_STATE_TTL_SECS: u64 = 600;

/// Placeholder secrets that show up in sample `.env` files
const INSECURE_SECRETS: &[&str] = &[
    "changeme-changeme-changeme-changeme",
    "your-secret-key-here-at-least-32-chars",
    "secretsecretsecretsecretsecretsecret",
];

/// Client credentials for one OAuth provider
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,
    pub trust_proxy_headers: bool,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Sessions
    pub session_secret: String,
    pub session_ttl_hours: i64,

    // OAuth providers (None = provider disabled)
    pub twitter: Option<OAuthClientConfig>,
    pub github: Option<OAuthClientConfig>,
    pub oauth_state_ttl_secs: u64,

    // Emails that become admins when they register
    pub admin_emails: Vec<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("public_url", &self.public_url)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("database_url", &"[REDACTED]")
            .field("database_max_connections", &self.database_max_connections)
            .field("session_secret", &"[REDACTED]")
            .field("session_ttl_hours", &self.session_ttl_hours)
            .field("twitter", &self.twitter)
            .field("github", &self.github)
            .field("oauth_state_ttl_secs", &self.oauth_state_ttl_secs)
            .field("admin_emails", &self.admin_emails.len())
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            trust_proxy_headers: parse_env_or_default("TRUST_PROXY_HEADERS", false)?,

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_env_or_default("DATABASE_MAX_CONNECTIONS", 10)?,

            // Sessions
            session_secret: {
                let secret = env::var("SESSION_SECRET")
                    .map_err(|_| ConfigError::Missing("SESSION_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "SESSION_SECRET must be at least 32 characters",
                    ));
                }
                if INSECURE_SECRETS.contains(&secret.as_str()) {
                    return Err(ConfigError::WeakSecret(
                        "SESSION_SECRET is using a known placeholder value",
                    ));
                }
                secret
            },
            session_ttl_hours: parse_env_or_default(
                "SESSION_TTL_HOURS",
                DEFAULT_SESSION_TTL_HOURS,
            )?,

            // OAuth
            twitter: oauth_client_from_env(ProviderKind::Twitter, "TWITTER", &public_url),
            github: oauth_client_from_env(ProviderKind::Github, "GITHUB", &public_url),
            oauth_state_ttl_secs: parse_env_or_default(
                "OAUTH_STATE_TTL_SECS",
                DEFAULT_OAUTH_STATE_TTL_SECS,
            )?,

            admin_emails: env::var("ADMIN_EMAILS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),

            public_url,
        })
    }

    pub fn oauth_client(&self, provider: ProviderKind) -> Option<&OAuthClientConfig> {
        match provider {
            ProviderKind::Twitter => self.twitter.as_ref(),
            ProviderKind::Github => self.github.as_ref(),
        }
    }

    pub fn oauth_state_ttl(&self) -> Duration {
        Duration::from_secs(self.oauth_state_ttl_secs)
    }
}

/// Read `{PREFIX}_CLIENT_ID` / `{PREFIX}_CLIENT_SECRET`; both must be present
/// for the provider to be enabled.
fn oauth_client_from_env(
    provider: ProviderKind,
    prefix: &str,
    public_url: &str,
) -> Option<OAuthClientConfig> {
    let client_id = env::var(format!("{}_CLIENT_ID", prefix))
        .ok()
        .filter(|v| !v.is_empty());
    let client_secret = env::var(format!("{}_CLIENT_SECRET", prefix))
        .ok()
        .filter(|v| !v.is_empty());

    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Some(OAuthClientConfig {
            client_id,
            client_secret,
            redirect_uri: env::var(format!("{}_REDIRECT_URI", prefix))
                .unwrap_or_else(|_| format!("{}/auth/{}/callback", public_url, provider)),
        }),
        (None, None) => None,
        _ => {
            tracing::warn!(
                provider = %provider,
                "Only one of {prefix}_CLIENT_ID / {prefix}_CLIENT_SECRET is set, provider disabled"
            );
            None
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env_or_default<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::Invalid(key, format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
