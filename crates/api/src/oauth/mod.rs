//! External identity providers (OAuth 2.0 authorization code flow with PKCE)
//!
//! Each provider implements [`OAuthProvider`]; the router only ever talks to
//! the trait, so provider quirks (credential placement, email visibility,
//! response shapes) stay inside the provider modules.

pub mod flow;
mod github;
mod twitter;

pub use github::GithubProvider;
pub use twitter::TwitterProvider;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_auth_shared::ProviderKind;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::{Config, OAuthClientConfig};

/// Upper bound for any single call to a provider
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("beacon-auth/", env!("CARGO_PKG_VERSION"));

/// Normalized user profile returned by every provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Stable provider-side user id
    pub external_id: String,
    pub handle: String,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Provider returned HTTP {status}")]
    Http { status: u16 },
    #[error("Network error talking to provider: {0}")]
    Network(String),
    #[error("Provider request timed out")]
    Timeout,
    #[error("Provider did not return an access token ({0})")]
    MissingAccessToken(String),
    #[error("Unexpected provider response: {0}")]
    Decode(String),
    #[error("Provider profile is missing '{0}'")]
    MissingProfileField(&'static str),
}

impl OAuthError {
    /// Failures worth retrying: the request never reached the provider or
    /// its edge reported a temporary problem.
    pub fn is_transient(&self) -> bool {
        match self {
            OAuthError::Network(_) => true,
            OAuthError::Http { status } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Failures caused by what the client sent (a bad or reused code) rather
    /// than by the provider being unavailable.
    pub fn is_client_error(&self) -> bool {
        match self {
            OAuthError::Http { status } => (400..500).contains(status),
            OAuthError::MissingAccessToken(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OAuthError::Timeout
        } else if err.is_decode() {
            OAuthError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            OAuthError::Http {
                status: status.as_u16(),
            }
        } else {
            OAuthError::Network(err.to_string())
        }
    }
}

/// One external identity provider
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// URL the user is sent to for consent. Embeds client id, redirect URI,
    /// scopes, `state` and the S256 `code_challenge`.
    fn authorization_url(&self, state: &str, code_challenge: &str) -> String;

    /// Trade an authorization code for an access token
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<String, OAuthError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError>;
}

/// Where a provider lives. Overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl ProviderEndpoints {
    pub fn twitter() -> Self {
        Self {
            authorize_url: "https://twitter.com/i/oauth2/authorize".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
            api_base: "https://api.twitter.com".to_string(),
        }
    }

    pub fn github() -> Self {
        Self {
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            api_base: "https://api.github.com".to_string(),
        }
    }

    /// Every endpoint under one base URL (`{base}/authorize`, `{base}/token`)
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            api_base: base.to_string(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

/// Backoff for transient token-exchange failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Run `operation`, retrying only while it fails with a transient error
    pub(crate) async fn run<F, Fut, T>(
        &self,
        provider: ProviderKind,
        mut operation: F,
    ) -> Result<T, OAuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OAuthError>>,
    {
        // Delays of base, 2*base, 4*base... (from_millis(2) yields 2, 4, 8)
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(self.max_retries)
            .map(jitter);

        Retry::spawn(strategy, || {
            let attempt = operation();
            async move {
                match attempt.await {
                    Ok(value) => Ok(Ok(value)),
                    Err(e) if e.is_transient() => {
                        tracing::debug!(
                            provider = %provider,
                            error = %e,
                            "Transient provider error - will retry"
                        );
                        Err(e)
                    }
                    // Wrapped in Ok to stop retrying
                    Err(e) => Ok(Err(e)),
                }
            }
        })
        .await
        .unwrap_or_else(Err)
    }
}

/// Shared HTTP client for provider calls
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// Turn a token endpoint response into an access token.
///
/// Some providers report failures as HTTP 200 with an `error` field, so a
/// success status alone is not enough.
pub(crate) async fn read_access_token(response: Response) -> Result<String, OAuthError> {
    let status = response.status();
    if !status.is_success() {
        return Err(OAuthError::Http {
            status: status.as_u16(),
        });
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| OAuthError::Decode(e.to_string()))?;

    match body.access_token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(OAuthError::MissingAccessToken(
            body.error.unwrap_or_else(|| "no error given".to_string()),
        )),
    }
}

/// Fail on non-success status, otherwise decode the JSON body
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, OAuthError> {
    let status = response.status();
    if !status.is_success() {
        return Err(OAuthError::Http {
            status: status.as_u16(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| OAuthError::Decode(e.to_string()))
}

/// Configured providers, keyed by kind. A provider absent from the registry
/// is "not configured".
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider that has credentials in `config`
    pub fn from_config(config: &Config, http: Client) -> Result<Self, url::ParseError> {
        let mut registry = Self::new();

        if let Some(creds) = config.oauth_client(ProviderKind::Twitter) {
            registry.register(Arc::new(TwitterProvider::new(
                creds.clone(),
                ProviderEndpoints::twitter(),
                http.clone(),
            )?));
        }
        if let Some(creds) = config.oauth_client(ProviderKind::Github) {
            registry.register(Arc::new(GithubProvider::new(
                creds.clone(),
                ProviderEndpoints::github(),
                http,
            )?));
        }

        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn enabled(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }
}

/// Append the standard authorization-code query to `base`
pub(crate) fn build_authorization_url(
    base: &url::Url,
    client: &OAuthClientConfig,
    scope: &str,
    state: &str,
    code_challenge: &str,
) -> String {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &client.client_id)
        .append_pair("redirect_uri", &client.redirect_uri)
        .append_pair("scope", scope)
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(OAuthError::Http { status: 503 }.is_transient());
        assert!(OAuthError::Network("reset".into()).is_transient());
        assert!(!OAuthError::Timeout.is_transient());
        assert!(!OAuthError::Http { status: 400 }.is_transient());

        assert!(OAuthError::Http { status: 401 }.is_client_error());
        assert!(OAuthError::MissingAccessToken("bad_verification_code".into()).is_client_error());
        assert!(!OAuthError::Http { status: 500 }.is_client_error());
        assert!(!OAuthError::Timeout.is_client_error());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = fast_retry()
            .run(ProviderKind::Github, move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OAuthError::Http { status: 502 })
                } else {
                    Ok("token")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "token");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_retry()
            .run(ProviderKind::Github, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(OAuthError::Http { status: 503 })
            })
            .await;

        assert!(matches!(result, Err(OAuthError::Http { status: 503 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_retry()
            .run(ProviderKind::Twitter, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(OAuthError::Http { status: 400 })
            })
            .await;

        assert!(matches!(result, Err(OAuthError::Http { status: 400 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_authorization_url_contains_pkce_params() {
        let base = url::Url::parse("https://idp.example/authorize").unwrap();
        let client = OAuthClientConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://beacon.example/auth/github/callback".into(),
        };

        let url = build_authorization_url(&base, &client, "read:user", "st8", "chal");
        let parsed = url::Url::parse(&url).unwrap();
        let params: HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["state"], "st8");
        assert_eq!(params["code_challenge"], "chal");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["redirect_uri"], client.redirect_uri);
        assert!(!url.contains("secret"));
    }
}
