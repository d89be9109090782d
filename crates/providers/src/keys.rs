//! Credential rotation with error-driven cooldown.
//!
//! Every provider owns an ordered list of credentials. A credential that
//! fails `error_threshold` times in a row is benched for `cooldown`; a
//! success clears both the counter and any cooldown. All state sits behind
//! one mutex, so concurrent sessions never double-count an error or hand out
//! a credential that another session just benched.

use helmsman_config::{ExhaustedKeyPolicy, KeyConfig};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("No active credential for provider '{0}'")]
    NoActiveKey(String),

    #[error("All credentials for provider '{provider}' are cooling down, retry in {}s", .retry_after.as_secs())]
    AllCoolingDown {
        provider: String,
        retry_after: Duration,
    },
}

#[derive(Debug, Clone)]
struct CredentialState {
    key: String,
    active: bool,
    error_count: u32,
    cooldown_until: Option<Instant>,
    last_used: Option<Instant>,
}

impl CredentialState {
    fn new(key: String) -> Self {
        Self {
            key,
            active: true,
            error_count: 0,
            cooldown_until: None,
            last_used: None,
        }
    }

    fn available(&self, now: Instant) -> bool {
        self.active && self.cooldown_until.is_none_or(|until| until <= now)
    }
}

/// Shared credential pool for every registered provider.
#[derive(Debug)]
pub struct KeyManager {
    credentials: Mutex<HashMap<String, Vec<CredentialState>>>,
    cooldown: Duration,
    error_threshold: u32,
    when_exhausted: ExhaustedKeyPolicy,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::from_config(&KeyConfig::default())
    }
}

impl KeyManager {
    pub fn new(cooldown: Duration, error_threshold: u32, when_exhausted: ExhaustedKeyPolicy) -> Self {
        Self {
            credentials: Mutex::new(HashMap::new()),
            cooldown,
            error_threshold: error_threshold.max(1),
            when_exhausted,
        }
    }

    pub fn from_config(config: &KeyConfig) -> Self {
        Self::new(
            Duration::from_secs(config.cooldown_secs),
            config.error_threshold,
            config.when_exhausted,
        )
    }

    /// Append a credential to the provider's rotation. Duplicates are ignored.
    pub fn add_key(&self, provider: &str, key: impl Into<String>) {
        let key = key.into();
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        let list = credentials.entry(provider.to_string()).or_default();
        if list.iter().any(|c| c.key == key) {
            return;
        }
        list.push(CredentialState::new(key));
        debug!(provider, count = list.len(), "Credential added");
    }

    /// Pick a credential for the next call.
    ///
    /// `Ok(None)` means the provider has no credentials at all (a local
    /// backend, say). Otherwise the first available credential wins; when
    /// every active one is cooling down, `when_exhausted` decides.
    pub fn get_key(&self, provider: &str) -> Result<Option<String>, KeyError> {
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = credentials.get_mut(provider).filter(|l| !l.is_empty()) else {
            return Ok(None);
        };

        let now = Instant::now();
        if let Some(state) = list.iter_mut().find(|c| c.available(now)) {
            state.last_used = Some(now);
            return Ok(Some(state.key.clone()));
        }

        let soonest = list
            .iter_mut()
            .filter(|c| c.active)
            .min_by_key(|c| c.cooldown_until.unwrap_or(now))
            .ok_or_else(|| KeyError::NoActiveKey(provider.to_string()))?;

        match self.when_exhausted {
            ExhaustedKeyPolicy::SoonestExpiry => {
                debug!(provider, "All credentials cooling down, using soonest to recover");
                soonest.last_used = Some(now);
                Ok(Some(soonest.key.clone()))
            }
            ExhaustedKeyPolicy::FailFast => Err(KeyError::AllCoolingDown {
                provider: provider.to_string(),
                retry_after: soonest
                    .cooldown_until
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or_default(),
            }),
        }
    }

    /// Count a failure against `key`; bench it once the threshold is hit.
    pub fn report_error(&self, provider: &str, key: &str) {
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = find(&mut credentials, provider, key) else {
            return;
        };

        state.error_count += 1;
        if state.error_count >= self.error_threshold {
            state.cooldown_until = Some(Instant::now() + self.cooldown);
            state.error_count = 0;
            warn!(
                provider,
                cooldown_secs = self.cooldown.as_secs(),
                "Credential placed in cooldown"
            );
        }
    }

    pub fn report_success(&self, provider: &str, key: &str) {
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = find(&mut credentials, provider, key) {
            state.error_count = 0;
            state.cooldown_until = None;
        }
    }

    /// Permanently take `key` out of rotation.
    pub fn disable_key(&self, provider: &str, key: &str) {
        let mut credentials = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = find(&mut credentials, provider, key) {
            state.active = false;
            info!(provider, "Credential disabled");
        }
    }

    /// Credentials not disabled (cooling down still counts).
    pub fn active_key_count(&self, provider: &str) -> usize {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .map_or(0, |list| list.iter().filter(|c| c.active).count())
    }
}

fn find<'a>(
    credentials: &'a mut HashMap<String, Vec<CredentialState>>,
    provider: &str,
    key: &str,
) -> Option<&'a mut CredentialState> {
    credentials
        .get_mut(provider)?
        .iter_mut()
        .find(|c| c.key == key)
}
