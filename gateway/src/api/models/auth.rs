use serde::{Deserialize, Serialize};

/// Query parameters received on the OAuth callback.
///
/// The provider sends `error` instead of `code` when the user denies access.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// The refresh token of the session being closed.
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Body of every error response. Never carries internal details.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}
