use std::fmt;

/// Errors produced by the authentication core.
///
/// Each variant is one failure kind; callers match on the variant rather than
/// on the message. Messages of the token kinds keep a stable wording.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid oauth config: {0}")]
    ConfigInvalid(String),

    #[error("invalid oauth state: {0}")]
    StateInvalid(&'static str),

    #[error("invalid redirect url: {0}")]
    RedirectMismatch(String),

    #[error("token exchange failed: {0}")]
    ExchangeFailed(ProviderFailure),

    #[error("failed to get user info: {0}")]
    UserInfoFailed(ProviderFailure),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("failed to parse token: {0}")]
    Parse(String),

    #[error("token is expired")]
    Expired,

    #[error("invalid token issuer")]
    InvalidIssuer,

    #[error("invalid token audience")]
    InvalidAudience,

    #[error("token has been revoked")]
    Revoked,

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("secure random source failed: {0}")]
    Random(String),

    #[error("state store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether the caller may retry the same operation.
    ///
    /// Only provider calls that timed out, failed on the network or got a
    /// 5xx response qualify. Token and state rejections are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExchangeFailed(failure) | Self::UserInfoFailed(failure) => {
                !failure.malformed
                    && (failure.timed_out || failure.status.is_none_or(|status| status >= 500))
            }
            Self::Store(_) => true,
            _ => false,
        }
    }

    /// Whether this error rejects a presented bearer token.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Expired | Self::InvalidIssuer | Self::InvalidAudience | Self::Revoked
        )
    }
}

/// Details of a failed call to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// HTTP status, if a response was received at all.
    pub status: Option<u16>,
    pub timed_out: bool,
    /// The provider answered, but the body could not be decoded.
    pub malformed: bool,
    pub detail: String,
}

impl ProviderFailure {
    pub(crate) fn status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            timed_out: false,
            malformed: false,
            detail: detail.into(),
        }
    }

    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            timed_out: err.is_timeout(),
            malformed: err.is_decode(),
            detail: err.to_string(),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.timed_out, self.status) {
            (true, _) => write!(f, "request timed out: {}", self.detail),
            (false, Some(status)) => write!(f, "provider returned {status}: {}", self.detail),
            (false, None) => f.write_str(&self.detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_messages_are_stable() {
        assert_eq!(Error::Expired.to_string(), "token is expired");
        assert_eq!(Error::Revoked.to_string(), "token has been revoked");
        assert_eq!(Error::InvalidIssuer.to_string(), "invalid token issuer");
        assert_eq!(Error::InvalidAudience.to_string(), "invalid token audience");
    }

    #[test]
    fn retryable_only_for_transient_provider_failures() {
        let timeout = ProviderFailure {
            status: None,
            timed_out: true,
            malformed: false,
            detail: "deadline".into(),
        };
        assert!(Error::ExchangeFailed(timeout).is_retryable());
        let undecodable = ProviderFailure {
            status: None,
            timed_out: false,
            malformed: true,
            detail: "error decoding response body".into(),
        };
        assert!(!Error::UserInfoFailed(undecodable).is_retryable());
        assert!(Error::UserInfoFailed(ProviderFailure::status(503, "busy")).is_retryable());
        assert!(!Error::ExchangeFailed(ProviderFailure::status(400, "invalid_grant")).is_retryable());
        assert!(!Error::StateInvalid("state is empty").is_retryable());
        assert!(!Error::Expired.is_retryable());
    }

    #[test]
    fn token_rejections() {
        assert!(Error::Revoked.is_token_rejection());
        assert!(Error::Parse("bad".into()).is_token_rejection());
        assert!(!Error::Signing("bad".into()).is_token_rejection());
    }
}
