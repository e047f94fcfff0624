//! Twitter (X) OAuth 2.0 provider
//!
//! Twitter requires PKCE and a confidential client authenticated with HTTP
//! Basic on the token endpoint. Email is never exposed through the v2 API.

use async_trait::async_trait;
use beacon_auth_shared::ProviderKind;
use reqwest::Client;
use serde::Deserialize;

use super::{
    build_authorization_url, read_access_token, read_json, OAuthError, OAuthProvider,
    ProviderEndpoints, ProviderProfile, RetryPolicy,
};
use crate::config::OAuthClientConfig;

const SCOPES: &str = "tweet.read users.read offline.access";

pub struct TwitterProvider {
    client: OAuthClientConfig,
    endpoints: ProviderEndpoints,
    authorize_url: url::Url,
    http: Client,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct MeResponse {
    data: Option<MeData>,
}

#[derive(Deserialize)]
struct MeData {
    id: Option<String>,
    username: Option<String>,
}

impl TwitterProvider {
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
}

#[async_trait]
impl OAuthProvider for TwitterProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Twitter
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> String {
        build_authorization_url(&self.authorize_url, &self.client, SCOPES, state, code_challenge)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<String, OAuthError> {
        self.retry
            .run(ProviderKind::Twitter, move || async move {
                let response = self
                    .http
                    .post(&self.endpoints.token_url)
                    .basic_auth(&self.client.client_id, Some(&self.client.client_secret))
                    .form(&[
                        ("grant_type", "authorization_code"),
                        ("code", code),
                        ("redirect_uri", self.client.redirect_uri.as_str()),
                        ("code_verifier", code_verifier),
                        ("client_id", self.client.client_id.as_str()),
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
            .get(self.endpoints.api("/2/users/me"))
            .bearer_auth(access_token)
            .send()
            .await?;
        let me: MeResponse = read_json(response).await?;

        let data = me.data.ok_or(OAuthError::MissingProfileField("data"))?;
        Ok(ProviderProfile {
            external_id: data
                .id
                .filter(|id| !id.is_empty())
                .ok_or(OAuthError::MissingProfileField("id"))?,
            handle: data
                .username
                .ok_or(OAuthError::MissingProfileField("username"))?,
            email: None,
        })
    }
}
