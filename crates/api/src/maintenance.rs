//! Background sweeps for the in-memory stores.
//!
//! PKCE entries and rate-limit buckets only grow between requests; these
//! loops drop what has expired. They only ever delete.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::auth::PkceStateStore;
use crate::security::RateLimiter;
use crate::state::AppState;

/// How often abandoned OAuth states are swept
pub const PKCE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep the PKCE store every `interval`.
pub async fn run_pkce_sweep_loop(store: Arc<PkceStateStore>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let removed = store.sweep();
        if removed > 0 {
            tracing::debug!(removed, remaining = store.len(), "Swept expired OAuth states");
        }
    }
}

/// Sweep a rate limiter every `interval`.
pub async fn run_rate_limit_sweep_loop(limiter: Arc<RateLimiter>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let removed = limiter.sweep().await;
        if removed > 0 {
            tracing::debug!(
                policy = limiter.policy().name,
                removed,
                "Swept idle rate-limit buckets"
            );
        }
    }
}

/// Handles to the spawned sweeps; dropping them does not stop the tasks.
pub struct MaintenanceTasks {
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceTasks {
    /// Start every sweep the application state needs. Each limiter is swept
    /// once per window.
    pub fn spawn(state: &AppState) -> Self {
        let general = state.general_limiter.clone();
        let auth = state.auth_limiter.clone();
        let general_window = general.policy().window;
        let auth_window = auth.policy().window;

        let handles = vec![
            tokio::spawn(run_pkce_sweep_loop(state.pkce.clone(), PKCE_SWEEP_INTERVAL)),
            tokio::spawn(run_rate_limit_sweep_loop(general, general_window)),
            tokio::spawn(run_rate_limit_sweep_loop(auth, auth_window)),
        ];

        Self { handles }
    }

    pub fn abort(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::RateLimitPolicy;
    use beacon_auth_shared::ProviderKind;

    #[tokio::test]
    async fn test_pkce_sweep_loop_drops_expired_states() {
        let store = Arc::new(PkceStateStore::new(Duration::from_millis(10), 100));
        store.begin(ProviderKind::Github);
        assert_eq!(store.len(), 1);

        let task = tokio::spawn(run_pkce_sweep_loop(store.clone(), Duration::from_millis(30)));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.is_empty());
        task.abort();
    }

    #[tokio::test]
    async fn test_rate_limit_sweep_loop_drops_idle_buckets() {
        let policy = RateLimitPolicy {
            name: "test",
            window: Duration::from_millis(20),
            max_requests: 5,
        };
        let limiter = Arc::new(RateLimiter::new(policy));
        limiter.check("10.0.0.1").await;
        assert_eq!(limiter.tracked_clients().await, 1);

        let task = tokio::spawn(run_rate_limit_sweep_loop(
            limiter.clone(),
            Duration::from_millis(30),
        ));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(limiter.tracked_clients().await, 0);
        task.abort();
    }
}
