//! Shared application state

use std::sync::Arc;

use crate::auth::{
    AccountProvisioner, AdminPreauthorization, CredentialHasher, EmailAllowList,
    NoPreauthorization, PkceStateStore, SessionTokenIssuer,
};
use crate::config::Config;
use crate::oauth::ProviderRegistry;
use crate::security::{RateLimitGuard, RateLimitPolicy, RateLimiter};
use crate::store::UserStore;

/// Everything a handler can reach. Cheap to clone; all members are shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn UserStore>,
    pub hasher: CredentialHasher,
    pub sessions: Arc<SessionTokenIssuer>,
    pub pkce: Arc<PkceStateStore>,
    pub providers: ProviderRegistry,
    pub provisioner: AccountProvisioner,
    pub general_limiter: Arc<RateLimiter>,
    pub auth_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn UserStore>,
        providers: ProviderRegistry,
        hasher: CredentialHasher,
    ) -> Self {
        let admin_policy: Arc<dyn AdminPreauthorization> = if config.admin_emails.is_empty() {
            Arc::new(NoPreauthorization)
        } else {
            Arc::new(EmailAllowList::new(&config.admin_emails))
        };

        let sessions = Arc::new(SessionTokenIssuer::new(
            &config.session_secret,
            config.session_ttl_hours,
        ));
        let pkce = Arc::new(PkceStateStore::new(
            config.oauth_state_ttl(),
            crate::auth::pkce::DEFAULT_MAX_ENTRIES,
        ));
        let provisioner = AccountProvisioner::new(store.clone(), hasher.clone(), admin_policy);

        Self {
            config: Arc::new(config),
            store,
            hasher,
            sessions,
            pkce,
            providers,
            provisioner,
            general_limiter: Arc::new(RateLimiter::new(RateLimitPolicy::GENERAL)),
            auth_limiter: Arc::new(RateLimiter::new(RateLimitPolicy::AUTH)),
        }
    }

    pub fn general_rate_limit(&self) -> RateLimitGuard {
        RateLimitGuard::new(self.general_limiter.clone(), self.config.trust_proxy_headers)
    }

    pub fn auth_rate_limit(&self) -> RateLimitGuard {
        RateLimitGuard::new(self.auth_limiter.clone(), self.config.trust_proxy_headers)
    }
}
