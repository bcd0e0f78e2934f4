use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use notes_auth::{BlacklistChecker, BoxError, Error, StateStore, TokenClaims};
use redis::AsyncCommands;

pub use self::config::RedisConfig;

mod config;

/// Redis-backed OAuth state store and token blacklist.
///
/// Keys:
/// - `<prefix>:oauth:state:<state>`: pending state, deleted on consume
/// - `<prefix>:oauth:pkce:<state>`: PKCE verifier, deleted after a successful exchange
/// - `<prefix>:token:revoked:<jti>`: revoked token, expires with the token
#[derive(Clone)]
pub struct RedisClient {
    client: redis::aio::ConnectionManager,
    keys: KeySpace,
}

impl RedisClient {
    pub async fn new(url: &str, config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("failed to create Redis client")?;

        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;

        Ok(Self {
            client: manager,
            keys: KeySpace::new(&config.key_prefix),
        })
    }
}

/// Write side of the token blacklist.
#[async_trait]
pub trait TokenRevoker: Send + Sync {
    /// Blacklists a token until its own expiry.
    async fn revoke(&self, claims: &TokenClaims) -> anyhow::Result<()>;
}

#[async_trait]
impl TokenRevoker for RedisClient {
    async fn revoke(&self, claims: &TokenClaims) -> anyhow::Result<()> {
        let ttl = claims.remaining_lifetime();
        if ttl.is_zero() {
            return Ok(());
        }

        let mut conn = self.client.clone();
        let _: () = conn
            .set_ex(self.keys.revoked(&claims.jti), 1u8, ttl_secs(ttl))
            .await
            .context("failed to revoke token in Redis")?;
        Ok(())
    }
}

#[async_trait]
impl BlacklistChecker for RedisClient {
    async fn is_token_blacklisted(&self, token_id: &str) -> Result<bool, BoxError> {
        let mut conn = self.client.clone();
        let exists: bool = conn
            .exists(self.keys.revoked(token_id))
            .await
            .context("failed to check token revocation in Redis")?;
        Ok(exists)
    }
}

#[async_trait]
impl StateStore for RedisClient {
    async fn save(
        &self,
        state: &str,
        code_verifier: Option<String>,
        ttl: Duration,
    ) -> Result<(), Error> {
        notes_auth::state::check_state_format(state)?;

        let ttl = ttl_secs(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(self.keys.state(state), 1u8, ttl)
            .ignore();
        if let Some(verifier) = code_verifier {
            pipe.set_ex(self.keys.pkce(state), verifier, ttl).ignore();
        }

        let mut conn = self.client.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("store oauth state", e))?;
        Ok(())
    }

    async fn consume(&self, state: &str) -> Result<(), Error> {
        notes_auth::state::check_state_format(state)?;

        let mut conn = self.client.clone();
        let deleted: i64 = conn
            .del(self.keys.state(state))
            .await
            .map_err(|e| store_error("consume oauth state", e))?;

        // Missing, expired and consumed states look the same once deleted.
        if deleted == 0 {
            return Err(Error::StateInvalid("state not found, expired or already used"));
        }
        Ok(())
    }

    async fn code_verifier(&self, state: &str) -> Result<Option<String>, Error> {
        let mut conn = self.client.clone();
        let verifier: Option<String> = conn
            .get(self.keys.pkce(state))
            .await
            .map_err(|e| store_error("read pkce verifier", e))?;
        Ok(verifier)
    }

    async fn remove_code_verifier(&self, state: &str) -> Result<(), Error> {
        let mut conn = self.client.clone();
        let _: i64 = conn
            .del(self.keys.pkce(state))
            .await
            .map_err(|e| store_error("remove pkce verifier", e))?;
        Ok(())
    }
}

fn store_error(operation: &str, e: redis::RedisError) -> Error {
    tracing::error!("redis failed to {operation}: {e}");
    Error::Store(format!("failed to {operation}"))
}

/// `SET EX` needs at least one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[derive(Clone)]
struct KeySpace {
    prefix: String,
}

impl KeySpace {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_owned(),
        }
    }

    fn state(&self, state: &str) -> String {
        format!("{}:oauth:state:{state}", self.prefix)
    }

    fn pkce(&self, state: &str) -> String {
        format!("{}:oauth:pkce:{state}", self.prefix)
    }

    fn revoked(&self, jti: &str) -> String {
        format!("{}:token:revoked:{jti}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let keys = KeySpace::new("notes:");
        assert_eq!(keys.state("abc"), "notes:oauth:state:abc");
        assert_eq!(keys.pkce("abc"), "notes:oauth:pkce:abc");
        assert_eq!(keys.revoked("j-1"), "notes:token:revoked:j-1");
    }

    #[test]
    fn ttl_is_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(600)), 600);
    }
}
