use async_trait::async_trait;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Revocation lookup consulted after a token passes all other checks.
///
/// Entries are written elsewhere (logout, explicit revocation), keyed by the
/// token's `jti` and kept until the token's own `exp`. A lookup error does
/// not reject the token: it is logged and the token is accepted.
#[async_trait]
pub trait BlacklistChecker: Send + Sync {
    async fn is_token_blacklisted(&self, token_id: &str) -> Result<bool, BoxError>;
}
