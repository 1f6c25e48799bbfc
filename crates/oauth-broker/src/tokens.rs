//! OAuth Token Manager (C2): keeps broker credentials live across a 24h
//! expiry window and a 2h idle window, for two environments (live, sandbox).

use chrono::{DateTime, Duration, Utc};
use engine_types::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

const EXPIRY_WINDOW: i64 = 24 * 3600;
const IDLE_WINDOW: i64 = 2 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Absent,
    Valid,
    Idle,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
    pub request_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl TokenSet {
    pub fn classify(&self, now: DateTime<Utc>) -> TokenState {
        let age = (now - self.issued_at).num_seconds();
        let idle = (now - self.last_used_at).num_seconds();
        if age >= EXPIRY_WINDOW {
            TokenState::Expired
        } else if idle >= IDLE_WINDOW {
            TokenState::Idle
        } else {
            TokenState::Valid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Live,
    Sandbox,
}

struct EnvSlot {
    tokens: Option<TokenSet>,
    state: TokenState,
}

/// Owns token state for both environments exclusively. Readers obtain a
/// short-lived signing helper rather than the raw secrets.
pub struct TokenManager {
    slots: RwLock<BTreeMap<Environment, EnvSlot>>,
}

impl TokenManager {
    pub fn new() -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(
            Environment::Live,
            EnvSlot {
                tokens: None,
                state: TokenState::Absent,
            },
        );
        slots.insert(
            Environment::Sandbox,
            EnvSlot {
                tokens: None,
                state: TokenState::Absent,
            },
        );
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// Loads a token set read at startup from the secret store (the fetch
    /// itself is the engine's narrow `load_tokens` interface, out of scope
    /// here — this just classifies and stores what was handed in).
    pub fn load_at_startup(&self, env: Environment, tokens: Option<TokenSet>, now: DateTime<Utc>) {
        let mut slots = self.slots.write().expect("token lock poisoned");
        let state = tokens
            .as_ref()
            .map(|t| t.classify(now))
            .unwrap_or(TokenState::Absent);
        slots.insert(env, EnvSlot { tokens, state });
    }

    pub fn state(&self, env: Environment) -> TokenState {
        self.slots
            .read()
            .expect("token lock poisoned")
            .get(&env)
            .map(|s| s.state)
            .unwrap_or(TokenState::Absent)
    }

    /// Produces signing credentials if the token is usable. Fails with
    /// `TokenExpired` if the state is EXPIRED.
    pub fn credentials_for_signing(&self, env: Environment) -> Result<TokenSet, EngineError> {
        let slots = self.slots.read().expect("token lock poisoned");
        let slot = slots
            .get(&env)
            .ok_or_else(|| EngineError::TokenExpired("no slot for environment".into()))?;
        match slot.state {
            TokenState::Expired | TokenState::Absent => Err(EngineError::TokenExpired(format!(
                "{:?} token is not usable ({:?})",
                env, slot.state
            ))),
            TokenState::Valid | TokenState::Idle => slot
                .tokens
                .clone()
                .ok_or_else(|| EngineError::TokenExpired("no tokens loaded".into())),
        }
    }

    /// Called after a successful keepalive/signing call resets
    /// `last_used_at` and reclassifies state back toward VALID.
    pub fn record_success(&self, env: Environment, now: DateTime<Utc>) {
        let mut slots = self.slots.write().expect("token lock poisoned");
        if let Some(slot) = slots.get_mut(&env) {
            if let Some(tokens) = slot.tokens.as_mut() {
                tokens.last_used_at = now;
                slot.state = tokens.classify(now);
            }
        }
    }

    /// 401/signature error: mark state EXPIRED; the caller is responsible for
    /// alerting the operator and disabling real ordering.
    pub fn mark_expired(&self, env: Environment) {
        let mut slots = self.slots.write().expect("token lock poisoned");
        if let Some(slot) = slots.get_mut(&env) {
            slot.state = TokenState::Expired;
        }
    }

    /// Invoked by an operator-driven listener when refreshed tokens arrive;
    /// atomically replaces and reclassifies.
    pub fn on_token_updated(&self, env: Environment, tokens: TokenSet, now: DateTime<Utc>) {
        let mut slots = self.slots.write().expect("token lock poisoned");
        let state = tokens.classify(now);
        slots.insert(
            env,
            EnvSlot {
                tokens: Some(tokens),
                state,
            },
        );
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff schedule for keepalive retries: 2/4/8s.
pub fn keepalive_backoff_schedule() -> [std::time::Duration; 3] {
    [
        std::time::Duration::from_secs(2),
        std::time::Duration::from_secs(4),
        std::time::Duration::from_secs(8),
    ]
}

pub fn idle_window() -> Duration {
    Duration::seconds(IDLE_WINDOW)
}

pub fn expiry_window() -> Duration {
    Duration::seconds(EXPIRY_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tokens(issued_at: DateTime<Utc>, last_used_at: DateTime<Utc>) -> TokenSet {
        TokenSet {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            access_token: "at".into(),
            access_token_secret: "ats".into(),
            request_token: None,
            issued_at,
            last_used_at,
        }
    }

    #[test]
    fn fresh_token_is_valid() {
        let now = Utc::now();
        let tokens = sample_tokens(now, now);
        assert_eq!(tokens.classify(now), TokenState::Valid);
    }

    #[test]
    fn token_unused_for_two_hours_goes_idle() {
        let now = Utc::now();
        let tokens = sample_tokens(now, now - Duration::hours(3));
        assert_eq!(tokens.classify(now), TokenState::Idle);
    }

    #[test]
    fn token_older_than_24h_is_expired_even_if_recently_used() {
        let now = Utc::now();
        let tokens = sample_tokens(now - Duration::hours(25), now);
        assert_eq!(tokens.classify(now), TokenState::Expired);
    }

    #[test]
    fn manager_rejects_signing_when_expired() {
        let manager = TokenManager::new();
        let now = Utc::now();
        let tokens = sample_tokens(now - Duration::hours(25), now);
        manager.load_at_startup(Environment::Sandbox, Some(tokens), now);
        assert!(manager.credentials_for_signing(Environment::Sandbox).is_err());
    }

    #[test]
    fn absent_environment_cannot_sign() {
        let manager = TokenManager::new();
        assert_eq!(manager.state(Environment::Live), TokenState::Absent);
        assert!(manager.credentials_for_signing(Environment::Live).is_err());
    }
}
