//! GitHub OAuth provider
//!
//! GitHub answers token requests with HTTP 200 even on failure (the body
//! carries `error` instead of `access_token`), and hides the email on the
//! profile unless the user made it public, so a second call lists the
//! account's addresses and picks the primary verified one.

use async_trait::async_trait;
use beacon_auth_shared::ProviderKind;
use reqwest::{header, Client};
use serde::Deserialize;

use super::{
    build_authorization_url, read_access_token, read_json, OAuthError, OAuthProvider,
    ProviderEndpoints, ProviderProfile, RetryPolicy,
};
use crate::config::OAuthClientConfig;

const SCOPES: &str = "read:user user:email";
const GITHUB_JSON: &str = "application/vnd.github+json";

pub struct GithubProvider {
    client: OAuthClientConfig,
    endpoints: ProviderEndpoints,
    authorize_url: url::Url,
    http: Client,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct GithubUser {
    id: Option<u64>,
    login: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

impl GithubProvider {
    pub fn new(
        client: OAuthClientConfig,
        endpoints: ProviderEndpoints,
        http: Client,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            authorize_url: url::Url::parse(&endpoints.authorize_url)?,
            client,
            endpoints,
            http,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Primary verified address, if any. Failures here are not fatal: the
    /// account is simply created without an email.
    async fn primary_verified_email(&self, access_token: &str) -> Option<String> {
        let result: Result<Vec<GithubEmail>, OAuthError> = async {
            let response = self
                .http
                .get(self.endpoints.api("/user/emails"))
                .bearer_auth(access_token)
                .header(header::ACCEPT, GITHUB_JSON)
                .send()
                .await?;
            read_json(response).await
        }
        .await;

        match result {
            Ok(emails) => emails
                .into_iter()
                .find(|e| e.primary && e.verified)
                .map(|e| e.email),
            Err(e) => {
                tracing::warn!(error = %e, "Could not list GitHub emails");
                None
            }
        }
    }
}

#[async_trait]
impl OAuthProvider for GithubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> String {
        build_authorization_url(&self.authorize_url, &self.client, SCOPES, state, code_challenge)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<String, OAuthError> {
        self.retry
            .run(ProviderKind::Github, move || async move {
                let response = self
                    .http
                    .post(&self.endpoints.token_url)
                    .header(header::ACCEPT, "application/json")
                    .form(&[
                        ("client_id", self.client.client_id.as_str()),
                        ("client_secret", self.client.client_secret.as_str()),
                        ("code", code),
                        ("redirect_uri", self.client.redirect_uri.as_str()),
                        ("code_verifier", code_verifier),
                    ])
                    .send()
                    .await?;
                read_access_token(response).await
            })
            .await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
        let response = self
            .http
            .get(self.endpoints.api("/user"))
            .bearer_auth(access_token)
            .header(header::ACCEPT, GITHUB_JSON)
            .send()
            .await?;
        let user: GithubUser = read_json(response).await?;

        let external_id = user.id.ok_or(OAuthError::MissingProfileField("id"))?;
        let handle = user.login.ok_or(OAuthError::MissingProfileField("login"))?;

        let email = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => Some(email),
            None => self.primary_verified_email(access_token).await,
        };

        Ok(ProviderProfile {
            external_id: external_id.to_string(),
            handle,
            email,
        })
    }
}
