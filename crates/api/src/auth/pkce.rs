//! PKCE state store
//!
//! Maps an opaque, single-use state token to the code verifier generated at
//! flow start. The verifier never leaves the server: clients only ever see the
//! state token and the derived challenge (inside the authorization URL).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use beacon_auth_shared::ProviderKind;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Default state lifetime (10 minutes)
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Maximum number of pending flows kept in memory
pub const DEFAULT_MAX_ENTRIES: usize = 1_000;

/// Random bytes in a code verifier (43 chars once encoded)
const VERIFIER_BYTES: usize = 32;

/// Random bytes in a state token
const STATE_BYTES: usize = 32;

struct PendingFlow {
    provider: ProviderKind,
    code_verifier: String,
    created_at: Instant,
}

/// Output of [`PkceStateStore::begin`]
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

/// TTL-bounded, size-bounded store of pending OAuth flows
pub struct PkceStateStore {
    entries: Mutex<HashMap<String, PendingFlow>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for PkceStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl PkceStateStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn begin(&self, provider: ProviderKind) -> PkceChallenge {
        self.begin_at(provider, Instant::now())
    }

    pub fn begin_at(&self, provider: ProviderKind, now: Instant) -> PkceChallenge {
        let code_verifier = random_token(VERIFIER_BYTES);
        let code_challenge = challenge_for(&code_verifier);
        let state = random_token(STATE_BYTES);

        let mut entries = lock(&self.entries);
        entries.insert(
            state.clone(),
            PendingFlow {
                provider,
                code_verifier: code_verifier.clone(),
                created_at: now,
            },
        );

        PkceChallenge {
            state,
            code_verifier,
            code_challenge,
        }
    }

    /// Take the verifier for `state`. The entry is removed whether or not the
    /// checks pass, so a state token can never be used twice.
    pub fn consume(&self, state: &str, provider: ProviderKind) -> Result<String, PkceError> {
        self.consume_at(state, provider, Instant::now())
    }

    pub fn consume_at(
        &self,
        state: &str,
        provider: ProviderKind,
        now: Instant,
    ) -> Result<String, PkceError> {
        let flow = lock(&self.entries)
            .remove(state)
            .ok_or(PkceError::InvalidOrExpiredState)?;

        if flow.provider != provider {
            tracing::warn!(
                expected = %provider,
                actual = %flow.provider,
                "OAuth state presented to the wrong provider"
            );
            return Err(PkceError::InvalidOrExpiredState);
        }

        if now.saturating_duration_since(flow.created_at) > self.ttl {
            return Err(PkceError::InvalidOrExpiredState);
        }

        Ok(flow.code_verifier)
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drop expired flows, then evict oldest until under the size cap.
    /// Returns the number of entries removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();

        let ttl = self.ttl;
        entries.retain(|_, flow| now.saturating_duration_since(flow.created_at) <= ttl);

        if entries.len() > self.max_entries {
            let mut by_age: Vec<(Instant, String)> = entries
                .iter()
                .map(|(state, flow)| (flow.created_at, state.clone()))
                .collect();
            by_age.sort_by_key(|(created_at, _)| *created_at);

            let excess = entries.len() - self.max_entries;
            for (_, state) in by_age.into_iter().take(excess) {
                entries.remove(&state);
            }
        }

        before - entries.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A poisoned lock only means another request panicked mid-insert; the map is
/// still structurally valid.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// S256 code challenge: BASE64URL(SHA256(verifier))
pub fn challenge_for(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    #[error("Invalid or expired OAuth state")]
    InvalidOrExpiredState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_challenge_vector() {
        // Appendix B of RFC 7636
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_begin_generates_fresh_values() {
        let store = PkceStateStore::default();
        let a = store.begin(ProviderKind::Github);
        let b = store.begin(ProviderKind::Github);

        assert_ne!(a.state, b.state);
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_eq!(a.code_verifier.len(), 43);
        assert_eq!(a.code_challenge, challenge_for(&a.code_verifier));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = PkceStateStore::default();
        let flow = store.begin(ProviderKind::Twitter);

        assert_eq!(
            store.consume(&flow.state, ProviderKind::Twitter),
            Ok(flow.code_verifier)
        );
        assert_eq!(
            store.consume(&flow.state, ProviderKind::Twitter),
            Err(PkceError::InvalidOrExpiredState)
        );
    }

    #[test]
    fn test_unknown_state_rejected() {
        let store = PkceStateStore::default();
        store.begin(ProviderKind::Twitter);
        assert_eq!(
            store.consume("wrong", ProviderKind::Twitter),
            Err(PkceError::InvalidOrExpiredState)
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_provider_mismatch_burns_state() {
        let store = PkceStateStore::default();
        let flow = store.begin(ProviderKind::Twitter);

        assert!(store.consume(&flow.state, ProviderKind::Github).is_err());
        assert!(store.consume(&flow.state, ProviderKind::Twitter).is_err());
    }

    #[test]
    fn test_expired_state_rejected() {
        let store = PkceStateStore::new(Duration::from_secs(600), 10);
        let start = Instant::now();
        let on_time = store.begin_at(ProviderKind::Github, start);
        let late = store.begin_at(ProviderKind::Github, start);

        assert!(store
            .consume_at(&on_time.state, ProviderKind::Github, start + Duration::from_secs(600))
            .is_ok());
        assert_eq!(
            store.consume_at(&late.state, ProviderKind::Github, start + Duration::from_secs(601)),
            Err(PkceError::InvalidOrExpiredState)
        );
    }

    #[test]
    fn test_sweep_removes_expired() {
        let store = PkceStateStore::new(Duration::from_secs(60), 10);
        let start = Instant::now();
        store.begin_at(ProviderKind::Github, start);
        let fresh = store.begin_at(ProviderKind::Github, start + Duration::from_secs(30));

        assert_eq!(store.sweep_at(start + Duration::from_secs(61)), 1);
        assert_eq!(store.len(), 1);
        assert!(store
            .consume_at(&fresh.state, ProviderKind::Github, start + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn test_sweep_evicts_oldest_over_cap() {
        let store = PkceStateStore::new(Duration::from_secs(600), 3);
        let start = Instant::now();
        let flows: Vec<_> = (0..5)
            .map(|i| store.begin_at(ProviderKind::Twitter, start + Duration::from_secs(i)))
            .collect();

        assert_eq!(store.sweep_at(start + Duration::from_secs(10)), 2);
        assert_eq!(store.len(), 3);

        let now = start + Duration::from_secs(10);
        assert!(store.consume_at(&flows[0].state, ProviderKind::Twitter, now).is_err());
        assert!(store.consume_at(&flows[1].state, ProviderKind::Twitter, now).is_err());
        assert!(store.consume_at(&flows[4].state, ProviderKind::Twitter, now).is_ok());
    }
}
