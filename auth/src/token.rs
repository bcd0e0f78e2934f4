//! The service's own bearer tokens: HS256 JWTs with a fixed claim set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blacklist::BlacklistChecker;
use crate::error::Error;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Value of the `iss` claim; tokens with another issuer are rejected.
    ///
    /// Default: `notes-app`
    pub issuer: String,

    /// Value of the `aud` claim; tokens with another audience are rejected.
    ///
    /// Default: `notes-users`
    pub audience: String,

    /// Default: `15m`
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Default: `24h`
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Upper bound for a single revocation lookup.
    ///
    /// Default: `250ms`
    #[serde(with = "humantime_serde")]
    pub blacklist_timeout: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "notes-app".to_owned(),
            audience: "notes-users".to_owned(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(24 * 60 * 60),
            blacklist_timeout: Duration::from_millis(250),
        }
    }
}

/// Identity a token pair is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Claims embedded in every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, equal to `user_id`.
    pub sub: String,
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    /// Session id shared by the access and refresh token of one pair.
    pub sid: String,
    /// Unique token id, the revocation key.
    pub jti: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Not before (Unix seconds), always equal to `iat`.
    pub nbf: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
}

impl TokenClaims {
    pub fn token_id(&self) -> &str {
        &self.jti
    }

    pub fn session_id(&self) -> &str {
        &self.sid
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.exp.saturating_mul(1000)
    }

    /// Time left until `exp`, zero once expired.
    ///
    /// Used as the lifetime of a revocation entry for this token.
    pub fn remaining_lifetime(&self) -> Duration {
        (self.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn user(&self) -> TokenUser {
        TokenUser {
            id: self.user_id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

/// Access and refresh token issued together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in whole seconds, fixed at issuance.
    pub expires_in: u64,
}

/// Issues and validates bearer tokens.
///
/// Built once from immutable configuration and shared by reference. The only
/// mutable part is the optional blacklist, swapped under a lock.
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    blacklist: RwLock<Option<Arc<dyn BlacklistChecker>>>,
}

impl TokenService {
    /// Creates a service signing with `secret`.
    ///
    /// # Errors
    ///
    /// [`Error::Signing`] if the secret is empty, [`Error::ConfigInvalid`] if
    /// the issuer or audience is empty.
    pub fn new(secret: &[u8], config: TokenConfig) -> Result<Self, Error> {
        if secret.is_empty() {
            return Err(Error::Signing("signing secret is empty".to_owned()));
        }
        if config.issuer.is_empty() {
            return Err(Error::ConfigInvalid("token issuer is empty".to_owned()));
        }
        if config.audience.is_empty() {
            return Err(Error::ConfigInvalid("token audience is empty".to_owned()));
        }

        // Expiry, issuer and audience are checked by hand, in a fixed order.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            config,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            blacklist: RwLock::new(None),
        })
    }

    /// Attaches a revocation checker at construction time.
    #[must_use]
    pub fn with_blacklist(self, checker: Arc<dyn BlacklistChecker>) -> Self {
        *self.blacklist.write() = Some(checker);
        self
    }

    /// Replaces the revocation checker of a shared service.
    pub fn set_blacklist(&self, checker: Option<Arc<dyn BlacklistChecker>>) {
        *self.blacklist.write() = checker;
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issues a new pair with a fresh session id.
    pub fn generate_token_pair(&self, user: &TokenUser) -> Result<TokenPair, Error> {
        self.issue_pair(user, Uuid::new_v4().to_string())
    }

    /// Verifies signature, expiry, issuer and audience, then asks the
    /// blacklist (if any) about the token id.
    pub async fn validate_token(&self, token: &str) -> Result<TokenClaims, Error> {
        let claims = self.verify(token)?;
        self.check_revocation(&claims).await?;
        Ok(claims)
    }

    /// Same pipeline as [`Self::validate_token`].
    pub async fn validate_refresh_token(&self, token: &str) -> Result<TokenClaims, Error> {
        self.validate_token(token).await
    }

    /// Validates a refresh token and issues a brand-new pair for the same
    /// user and session. The presented token is left untouched.
    ///
    /// Both tokens of a pair carry the same claim set, so they are told apart
    /// by lifetime: while the access TTL is shorter than the refresh TTL, a
    /// token that lives no longer than the access TTL is refused here.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        let claims = self.validate_refresh_token(refresh_token).await?;
        if self.is_access_lifetime(&claims) {
            return Err(Error::Validation(
                "access token presented as refresh token".to_owned(),
            ));
        }
        let pair = self.issue_pair(&claims.user(), claims.sid.clone())?;
        tracing::debug!(
            user_id = %claims.user_id,
            session_id = %claims.sid,
            "token pair refreshed"
        );
        Ok(pair)
    }

    /// True for any token that fails verification or whose `exp` passed.
    pub fn is_token_expired(&self, token: &str) -> bool {
        self.decode_verified(token)
            .map(|claims| claims.is_expired_at(Utc::now()))
            .unwrap_or(true)
    }

    /// Reads `exp` without verifying anything. For display only.
    pub fn token_expiration(&self, token: &str) -> Result<DateTime<Utc>, Error> {
        #[derive(Deserialize)]
        struct Expiry {
            exp: i64,
        }

        check_segments(token)?;
        let payload = token.split('.').nth(1).unwrap_or_default();
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| Error::Parse(format!("malformed token payload: {e}")))?;
        let Expiry { exp } = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Parse(format!("malformed token claims: {e}")))?;

        DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| Error::Parse("expiration out of range".to_owned()))
    }

    fn issue_pair(&self, user: &TokenUser, session_id: String) -> Result<TokenPair, Error> {
        if user.id.is_empty() {
            return Err(Error::Validation("user id is empty".to_owned()));
        }

        let now = Utc::now();
        let access = self.claims_for(user, &session_id, now, self.config.access_token_ttl)?;
        let refresh = self.claims_for(user, &session_id, now, self.config.refresh_token_ttl)?;

        let pair = TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            token_type: TOKEN_TYPE_BEARER.to_owned(),
            expires_in: self.config.access_token_ttl.as_secs(),
        };

        tracing::debug!(
            user_id = %user.id,
            session_id = %session_id,
            access_jti = %access.jti,
            refresh_jti = %refresh.jti,
            "token pair issued"
        );
        Ok(pair)
    }

    fn is_access_lifetime(&self, claims: &TokenClaims) -> bool {
        let access = self.config.access_token_ttl;
        if access >= self.config.refresh_token_ttl {
            return false;
        }
        let lifetime = claims.exp.saturating_sub(claims.iat);
        u64::try_from(lifetime).is_ok_and(|secs| secs <= access.as_secs())
    }

    fn claims_for(
        &self,
        user: &TokenUser,
        session_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<TokenClaims, Error> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Signing(format!("invalid token ttl: {e}")))?;
        let iat = now.timestamp();

        Ok(TokenClaims {
            sub: user.id.clone(),
            user_id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            sid: session_id.to_owned(),
            jti: Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat,
            nbf: iat,
            exp: (now + ttl).timestamp(),
        })
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| Error::Signing(e.to_string()))
    }

    fn decode_verified(&self, token: &str) -> Result<TokenClaims, Error> {
        check_segments(token)?;
        jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(parse_error)
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, Error> {
        let claims = self.decode_verified(token)?;

        if claims.is_expired_at(Utc::now()) {
            return Err(Error::Expired);
        }
        if claims.iss != self.config.issuer {
            return Err(Error::InvalidIssuer);
        }
        if claims.aud != self.config.audience {
            return Err(Error::InvalidAudience);
        }
        Ok(claims)
    }

    async fn check_revocation(&self, claims: &TokenClaims) -> Result<(), Error> {
        let checker = self.blacklist.read().clone();
        let Some(checker) = checker else {
            return Ok(());
        };

        let lookup = checker.is_token_blacklisted(&claims.jti);
        match tokio::time::timeout(self.config.blacklist_timeout, lookup).await {
            Ok(Ok(false)) => Ok(()),
            Ok(Ok(true)) => {
                tracing::warn!(
                    user_id = %claims.user_id,
                    jti = %claims.jti,
                    "rejected revoked token"
                );
                Err(Error::Revoked)
            }
            Ok(Err(e)) => {
                tracing::warn!(jti = %claims.jti, "blacklist check failed, token accepted: {e}");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    jti = %claims.jti,
                    timeout = ?self.config.blacklist_timeout,
                    "blacklist check timed out, token accepted"
                );
                Ok(())
            }
        }
    }
}

fn check_segments(token: &str) -> Result<(), Error> {
    if token.is_empty() {
        return Err(Error::Parse("token is empty".to_owned()));
    }
    if token.split('.').count() != 3 {
        return Err(Error::Parse(
            "token contains an invalid number of segments".to_owned(),
        ));
    }
    Ok(())
}

fn parse_error(e: jsonwebtoken::errors::Error) -> Error {
    match e.kind() {
        ErrorKind::InvalidSignature => Error::Parse("token signature is invalid".to_owned()),
        ErrorKind::InvalidAlgorithm => Error::Parse("unexpected signing method".to_owned()),
        _ => Error::Parse(format!("malformed token: {e}")),
    }
}
