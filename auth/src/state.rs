//! Single-use anti-CSRF `state` values and the PKCE verifiers bound to them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::random;

const STATE_BYTES: usize = 32;

/// Length of a generated state value.
pub const STATE_LEN: usize = random::encoded_len(STATE_BYTES);

/// Shortest state accepted on save or validation.
pub const MIN_STATE_LEN: usize = 32;

pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(10 * 60);

const STATE_NOT_FOUND: &str = "state not found";
const STATE_EXPIRED: &str = "state has expired";
const STATE_CONSUMED: &str = "state has already been used";

/// Generates a state value: 32 random bytes as base64url (43 characters).
pub fn generate_secure_state() -> Result<String, Error> {
    random::random_base64url::<STATE_BYTES>()
}

/// Rejects values that cannot be a state we issued.
pub fn check_state_format(state: &str) -> Result<(), Error> {
    if state.is_empty() {
        return Err(Error::StateInvalid("state is empty"));
    }
    if state.len() < MIN_STATE_LEN {
        return Err(Error::StateInvalid("state is too short"));
    }
    Ok(())
}

/// Storage for pending OAuth states.
///
/// `consume` must be an atomic check-and-set: of any number of concurrent
/// calls with the same value, exactly one succeeds.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Records a state, optionally with the PKCE verifier of the same login
    /// attempt. Both expire after `ttl`.
    async fn save(
        &self,
        state: &str,
        code_verifier: Option<String>,
        ttl: Duration,
    ) -> Result<(), Error>;

    /// Marks the state as used. Fails with [`Error::StateInvalid`] if it was
    /// never stored, has expired or was already consumed.
    async fn consume(&self, state: &str) -> Result<(), Error>;

    /// Returns the PKCE verifier stored with `state` without removing it.
    ///
    /// Works whether or not the state was consumed; returns `None` once the
    /// verifier was removed or the entry expired.
    async fn code_verifier(&self, state: &str) -> Result<Option<String>, Error>;

    /// Drops the PKCE verifier stored with `state`. Removing a missing
    /// verifier is not an error.
    async fn remove_code_verifier(&self, state: &str) -> Result<(), Error>;
}

struct StateRecord {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    consumed: bool,
    code_verifier: Option<Zeroizing<String>>,
}

impl StateRecord {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Process-local [`StateStore`].
///
/// Consumed entries are kept until they expire so that a replay reports
/// "already used". Expired entries are dropped by [`Self::sweep_expired`],
/// which [`Self::spawn_sweeper`] runs on an interval.
#[derive(Default)]
pub struct MemoryStateStore {
    records: DashMap<String, StateRecord>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes expired entries, returning how many were dropped.
    ///
    /// `retain` holds each shard's write lock, so an entry can't be removed
    /// while a `consume` on it is in progress.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired_at(now));
        before.saturating_sub(self.records.len())
    }

    /// Runs [`Self::sweep_expired`] every `interval` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired oauth states");
                }
            }
        })
    }

    fn drop_if_expired(&self, state: &str, now: DateTime<Utc>) {
        self.records
            .remove_if(state, |_, record| record.is_expired_at(now));
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(
        &self,
        state: &str,
        code_verifier: Option<String>,
        ttl: Duration,
    ) -> Result<(), Error> {
        check_state_format(state)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Store(format!("invalid state ttl: {e}")))?;

        let now = Utc::now();
        self.records.insert(state.to_owned(), StateRecord {
            created_at: now,
            expires_at: now + ttl,
            consumed: false,
            code_verifier: code_verifier.map(Zeroizing::new),
        });
        Ok(())
    }

    async fn consume(&self, state: &str) -> Result<(), Error> {
        check_state_format(state)?;
        let now = Utc::now();

        {
            let Some(mut record) = self.records.get_mut(state) else {
                return Err(Error::StateInvalid(STATE_NOT_FOUND));
            };
            if record.is_expired_at(now) {
                tracing::debug!(
                    age_secs = (now - record.created_at).num_seconds(),
                    "rejecting expired oauth state"
                );
            } else {
                if record.consumed {
                    return Err(Error::StateInvalid(STATE_CONSUMED));
                }
                record.consumed = true;
                return Ok(());
            }
        }

        self.drop_if_expired(state, now);
        Err(Error::StateInvalid(STATE_EXPIRED))
    }

    async fn code_verifier(&self, state: &str) -> Result<Option<String>, Error> {
        let now = Utc::now();

        {
            let Some(record) = self.records.get(state) else {
                return Ok(None);
            };
            if !record.is_expired_at(now) {
                return Ok(record
                    .code_verifier
                    .as_ref()
                    .map(|verifier| verifier.as_str().to_owned()));
            }
        }

        self.drop_if_expired(state, now);
        Ok(None)
    }

    async fn remove_code_verifier(&self, state: &str) -> Result<(), Error> {
        if let Some(mut record) = self.records.get_mut(state) {
            record.code_verifier = None;
        }
        Ok(())
    }
}
