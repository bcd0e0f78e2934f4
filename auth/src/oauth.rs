//! Authorization Code + PKCE client for an OAuth 2.0 / OIDC provider.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

use crate::error::{Error, ProviderFailure};
use crate::pkce;
use crate::state::{self, MemoryStateStore, StateStore};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Provider client settings.
///
/// `client_id` and `client_secret` are normally filled from the environment
/// rather than a config file; the secret is never serialized.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,

    #[serde(skip_serializing)]
    pub client_secret: String,

    /// Registered callback URL. Redirect candidates must match its scheme,
    /// host, port and path.
    pub redirect_url: String,

    /// Default: `["openid", "email", "profile"]`
    pub scopes: Vec<String>,

    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,

    /// Timeout of a single call to the token or userinfo endpoint.
    ///
    /// Default: `10s`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Lifetime of a pending `state` and its PKCE verifier.
    ///
    /// Default: `10m`
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            scopes: default_scopes(),
            auth_url: GOOGLE_AUTH_URL.to_owned(),
            token_url: GOOGLE_TOKEN_URL.to_owned(),
            userinfo_url: GOOGLE_USERINFO_URL.to_owned(),
            request_timeout: Duration::from_secs(10),
            state_ttl: state::DEFAULT_STATE_TTL,
        }
    }
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("request_timeout", &self.request_timeout)
            .field("state_ttl", &self.state_ttl)
            .finish()
    }
}

impl GoogleConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            ..Default::default()
        }
    }

    /// # Errors
    ///
    /// [`Error::ConfigInvalid`] if a credential is empty, the redirect URL is
    /// not an absolute URL or no scopes are configured.
    pub fn validate(&self) -> Result<(), Error> {
        if self.client_id.is_empty() {
            return Err(Error::ConfigInvalid("client_id is required".to_owned()));
        }
        if self.client_secret.is_empty() {
            return Err(Error::ConfigInvalid("client_secret is required".to_owned()));
        }
        if self.redirect_url.is_empty() {
            return Err(Error::ConfigInvalid("redirect_url is required".to_owned()));
        }
        parse_absolute("redirect_url", &self.redirect_url)?;
        if self.scopes.is_empty() {
            return Err(Error::ConfigInvalid(
                "at least one scope is required".to_owned(),
            ));
        }
        Ok(())
    }
}

fn default_scopes() -> Vec<String> {
    ["openid", "email", "profile"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn parse_absolute(field: &str, value: &str) -> Result<Url, Error> {
    let url = Url::parse(value).map_err(|e| Error::ConfigInvalid(format!("{field}: {e}")))?;
    if url.cannot_be_a_base() || !url.has_host() {
        return Err(Error::ConfigInvalid(format!(
            "{field}: must be an absolute URL"
        )));
    }
    Ok(url)
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderToken")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Profile returned by the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Provider user id. OIDC userinfo sends `sub` instead.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing)]
    sub: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "email_verified")]
    pub verified_email: Option<bool>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl UserInfo {
    /// Fills `id` from `sub` when only the latter was sent.
    fn normalize(mut self) -> Self {
        if self.id.is_empty() {
            self.id = self.sub.take().unwrap_or_default();
        }
        self
    }

    /// Requires `id`, `email` and `name` to be non-empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::Validation("user info is missing id".to_owned()));
        }
        if self.email.is_empty() {
            return Err(Error::Validation("user info is missing email".to_owned()));
        }
        if self.name.is_empty() {
            return Err(Error::Validation("user info is missing name".to_owned()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum ProviderCall {
    TokenExchange,
    UserInfo,
}

impl ProviderCall {
    fn fail(self, failure: ProviderFailure) -> Error {
        match self {
            Self::TokenExchange => Error::ExchangeFailed(failure),
            Self::UserInfo => Error::UserInfoFailed(failure),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::TokenExchange => "token exchange",
            Self::UserInfo => "userinfo request",
        }
    }
}

/// Drives one provider's login flow.
///
/// The PKCE verifier of each attempt is kept in the [`StateStore`] under its
/// `state` value and never leaves the service except in the token request.
pub struct OAuthService {
    config: GoogleConfig,
    redirect_url: Url,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
    http: reqwest::Client,
    states: Arc<dyn StateStore>,
}

impl OAuthService {
    /// Validates `config` and builds a service with an in-memory state store.
    pub fn new(config: GoogleConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            redirect_url: parse_absolute("redirect_url", &config.redirect_url)?,
            auth_url: parse_absolute("auth_url", &config.auth_url)?,
            token_url: parse_absolute("token_url", &config.token_url)?,
            userinfo_url: parse_absolute("userinfo_url", &config.userinfo_url)?,
            config,
            http: reqwest::Client::new(),
            states: Arc::new(MemoryStateStore::new()),
        })
    }

    /// Use a custom HTTP client (connection pool reuse).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Use a shared state store instead of the in-memory one.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.states = store;
        self
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Builds the authorization URL for `state`.
    ///
    /// Stores `state` together with a fresh PKCE verifier; only the derived
    /// challenge goes into the URL.
    pub async fn auth_url(&self, state: &str) -> Result<String, Error> {
        state::check_state_format(state)?;

        let code_verifier = pkce::generate_code_verifier()?;
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        self.states
            .save(state, Some(code_verifier), self.config.state_ttl)
            .await?;

        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", pkce::CODE_CHALLENGE_METHOD);

        tracing::debug!("authorization url issued");
        Ok(url.into())
    }

    /// Consumes `state`. A failure means the flow must restart.
    pub async fn validate_state(&self, state: &str) -> Result<(), Error> {
        self.states.consume(state).await.inspect_err(|e| {
            tracing::warn!("oauth state rejected: {e}");
        })
    }

    /// Exchanges an authorization code for provider tokens.
    ///
    /// `redirect_uri` must match the configured redirect URL; an empty value
    /// means the configured one. The PKCE verifier stored for `state` is
    /// dropped once the provider accepts the code, so a failed exchange can
    /// be retried and a successful one can't be repeated.
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<ProviderToken, Error> {
        if code.is_empty() {
            return Err(Error::Validation("authorization code is empty".to_owned()));
        }
        let redirect_uri = if redirect_uri.is_empty() {
            self.redirect_url.as_str()
        } else {
            self.verify_redirect_url(redirect_uri)?;
            redirect_uri
        };

        let code_verifier = self
            .states
            .code_verifier(state)
            .await?
            .map(Zeroizing::new)
            .ok_or(Error::StateInvalid("no pending code verifier for state"))?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier.as_str()),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let call = ProviderCall::TokenExchange;
        let response = self
            .http
            .post(self.token_url.clone())
            .timeout(self.config.request_timeout)
            .form(&params)
            .send()
            .await
            .map_err(|e| call.fail(ProviderFailure::transport(&e)))?;

        let response = Self::ensure_success(response, call).await?;
        self.states.remove_code_verifier(state).await?;

        let token = response
            .json::<ProviderToken>()
            .await
            .map_err(|e| call.fail(ProviderFailure::transport(&e)))?;

        tracing::info!("authorization code exchanged");
        Ok(token)
    }

    /// Fetches and validates the user's profile.
    pub async fn user_info(&self, token: &ProviderToken) -> Result<UserInfo, Error> {
        let call = ProviderCall::UserInfo;
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .timeout(self.config.request_timeout)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| call.fail(ProviderFailure::transport(&e)))?;

        let user = Self::ensure_success(response, call)
            .await?
            .json::<UserInfo>()
            .await
            .map_err(|e| call.fail(ProviderFailure::transport(&e)))?
            .normalize();

        user.validate()?;
        Ok(user)
    }

    /// Accepts `candidate` only if its scheme, host, port and path equal the
    /// configured redirect URL. Query and fragment are ignored.
    pub fn verify_redirect_url(&self, candidate: &str) -> Result<(), Error> {
        let url = Url::parse(candidate)
            .map_err(|e| Error::RedirectMismatch(format!("malformed url: {e}")))?;
        let expected = &self.redirect_url;

        if url.scheme() != expected.scheme() {
            return Err(Error::RedirectMismatch("scheme mismatch".to_owned()));
        }
        if url.host_str() != expected.host_str()
            || url.port_or_known_default() != expected.port_or_known_default()
        {
            return Err(Error::RedirectMismatch("host mismatch".to_owned()));
        }
        if url.path() != expected.path() {
            return Err(Error::RedirectMismatch("path mismatch".to_owned()));
        }
        Ok(())
    }

    async fn ensure_success(
        response: reqwest::Response,
        call: ProviderCall,
    ) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "{} rejected by provider", call.name());
        Err(call.fail(ProviderFailure::status(status.as_u16(), body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GoogleConfig {
        GoogleConfig::new("test-client", "test-secret", "https://example.com/callback")
    }

    fn query_param(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn default_scopes() {
        let config = GoogleConfig::default();
        assert_eq!(config.scopes, ["openid", "email", "profile"]);
        assert_eq!(config.auth_url, GOOGLE_AUTH_URL);
    }

    #[test]
    fn config_validation() {
        assert!(test_config().validate().is_ok());

        let cases = [
            GoogleConfig {
                client_id: String::new(),
                ..test_config()
            },
            GoogleConfig {
                client_secret: String::new(),
                ..test_config()
            },
            GoogleConfig {
                redirect_url: String::new(),
                ..test_config()
            },
            GoogleConfig {
                redirect_url: "/relative/callback".to_owned(),
                ..test_config()
            },
            GoogleConfig {
                scopes: Vec::new(),
                ..test_config()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
            assert!(OAuthService::new(config).is_err());
        }
    }

    #[test]
    fn debug_hides_secret() {
        let debug = format!("{:?}", test_config());
        assert!(!debug.contains("test-secret"));
        assert!(debug.contains("test-client"));
    }

    #[test]
    fn secret_is_not_serialized() {
        let json = serde_json::to_string(&test_config()).unwrap();
        assert!(!json.contains("test-secret"));
    }

    #[tokio::test]
    async fn auth_url_contains_pkce() {
        let service = OAuthService::new(test_config()).unwrap();
        let state = state::generate_secure_state().unwrap();
        let url = service.auth_url(&state).await.unwrap();

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("test-client"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("https://example.com/callback")
        );
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(
            query_param(&url, "scope").as_deref(),
            Some("openid email profile")
        );
        assert_eq!(query_param(&url, "state"), Some(state.clone()));
        assert_eq!(
            query_param(&url, "code_challenge_method").as_deref(),
            Some("S256")
        );

        let challenge = query_param(&url, "code_challenge").unwrap();
        assert_eq!(challenge.len(), 43);

        let verifier = service
            .states
            .code_verifier(&state)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pkce::generate_code_challenge(&verifier), challenge);
        assert!(!url.contains(&verifier));
    }

    #[tokio::test]
    async fn auth_url_rejects_bad_state() {
        let service = OAuthService::new(test_config()).unwrap();
        assert!(matches!(
            service.auth_url("").await,
            Err(Error::StateInvalid(_))
        ));
        assert!(matches!(
            service.auth_url("abc").await,
            Err(Error::StateInvalid(_))
        ));
    }

    #[tokio::test]
    async fn validate_state_is_single_use() {
        let service = OAuthService::new(test_config()).unwrap();
        let state = state::generate_secure_state().unwrap();
        service.auth_url(&state).await.unwrap();

        service.validate_state(&state).await.unwrap();
        assert!(matches!(
            service.validate_state(&state).await,
            Err(Error::StateInvalid(_))
        ));

        let unknown = state::generate_secure_state().unwrap();
        assert!(matches!(
            service.validate_state(&unknown).await,
            Err(Error::StateInvalid(_))
        ));
    }

    #[test]
    fn redirect_url_must_match_exactly() {
        let service = OAuthService::new(test_config()).unwrap();

        assert!(service.verify_redirect_url("https://example.com/callback").is_ok());
        assert!(
            service
                .verify_redirect_url("https://example.com/callback?x=1#frag")
                .is_ok()
        );

        for candidate in [
            "http://example.com/callback",
            "https://evil.com/callback",
            "https://example.com.evil.com/callback",
            "https://example.com:8443/callback",
            "https://example.com/callback/extra",
            "https://example.com/other",
            "not a url",
            "",
        ] {
            assert!(
                matches!(
                    service.verify_redirect_url(candidate),
                    Err(Error::RedirectMismatch(_))
                ),
                "{candidate} should be rejected"
            );
        }
    }

    #[test]
    fn user_info_accepts_sub_alias() {
        let info: UserInfo = serde_json::from_str(
            r#"{ "sub": "123", "email": "a@b.c", "name": "A", "email_verified": true }"#,
        )
        .unwrap();
        assert_eq!(info.id, "123");
        assert_eq!(info.verified_email, Some(true));
        assert!(info.validate().is_ok());

        let missing_name: UserInfo =
            serde_json::from_str(r#"{ "id": "123", "email": "a@b.c" }"#).unwrap();
        assert!(matches!(missing_name.validate(), Err(Error::Validation(_))));
    }
}
