use axum::Json;
use axum::extract::{FromRef, FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use notes_auth::{Error as AuthError, TokenClaims, TokenService, TokenUser};

use super::cookies;
use crate::api::models::auth::{ErrorResponse, LogoutRequest, OAuthCallbackQuery, RefreshRequest};
use crate::api::state::ApiState;
use crate::redis::TokenRevoker;

// ── Auth extractor ─────────────────────────────────────────────────────────────

/// Authenticated user extracted from a Bearer token.
pub struct AuthUser(pub TokenClaims);

impl<S> FromRequestParts<S> for AuthUser
where
    ApiState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        let api_state = ApiState::from_ref(state);
        let claims = api_state.tokens().validate_token(token).await.map_err(|e| {
            tracing::debug!("bearer token rejected: {e}");
            auth_error_response(&e)
        })?;

        Ok(AuthUser(claims))
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub async fn login(State(state): State<ApiState>, jar: CookieJar) -> Response {
    login_impl(state, jar).await.unwrap_or_else(|e| {
        tracing::error!("OAuth login error: {e:#}");
        internal_error_response(&e)
    })
}

pub async fn callback(
    State(state): State<ApiState>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackQuery>,
) -> Response {
    callback_impl(state, jar, params).await.unwrap_or_else(|e| {
        tracing::error!("OAuth callback error: {e:#}");
        internal_error_response(&e)
    })
}

pub async fn refresh(State(state): State<ApiState>, Json(req): Json<RefreshRequest>) -> Response {
    match state.tokens().refresh(&req.refresh_token).await {
        Ok(pair) => Json(pair).into_response(),
        Err(e) => {
            tracing::debug!("refresh rejected: {e}");
            auth_error_response(&e)
        }
    }
}

pub async fn logout(
    State(state): State<ApiState>,
    AuthUser(claims): AuthUser,
    Json(req): Json<LogoutRequest>,
) -> Response {
    logout_impl(state, claims, req).await.unwrap_or_else(|e| {
        tracing::error!("Logout error: {e:#}");
        internal_error_response(&e)
    })
}

// ── Impl ────────────────────────────────────────────────────────────────────

async fn login_impl(state: ApiState, jar: CookieJar) -> anyhow::Result<Response> {
    let oauth = state.oauth();
    let csrf_state = notes_auth::generate_secure_state()?;
    let auth_url = oauth.auth_url(&csrf_state).await?;

    tracing::info!("OAuth login initiated");
    Ok(login_redirect(jar, &auth_url, &csrf_state, oauth.config().state_ttl))
}

fn login_redirect(
    jar: CookieJar,
    auth_url: &str,
    csrf_state: &str,
    state_ttl: std::time::Duration,
) -> Response {
    let jar = jar.add(cookies::state_cookie(csrf_state, state_ttl));
    (jar, Redirect::to(auth_url)).into_response()
}

async fn callback_impl(
    state: ApiState,
    jar: CookieJar,
    params: OAuthCallbackQuery,
) -> anyhow::Result<Response> {
    let bound = check_state_binding(&jar, &params.state);
    let jar = jar.add(cookies::clear_state_cookie());

    if let Some(error) = &params.error {
        tracing::warn!(%error, "OAuth provider returned an error");
        return Ok((
            jar,
            error_response(StatusCode::BAD_REQUEST, "authorization denied"),
        )
            .into_response());
    }
    if let Err(e) = bound {
        tracing::warn!("OAuth callback rejected: {e}");
        return Ok((jar, auth_error_response(&e)).into_response());
    }

    let oauth = state.oauth();
    oauth.validate_state(&params.state).await?;

    let token = oauth
        .exchange_code_for_token(&params.code, &params.state, "")
        .await?;
    let user = oauth.user_info(&token).await?;

    let pair = state.tokens().generate_token_pair(&TokenUser {
        id: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
    })?;

    tracing::info!(user_id = %user.id, email = %user.email, "user authenticated");
    Ok((jar, Json(pair)).into_response())
}

/// The callback must come from the browser holding the state cookie.
fn check_state_binding(jar: &CookieJar, state: &str) -> Result<(), AuthError> {
    match cookies::get_state(jar) {
        Some(bound) if !state.is_empty() && bound == state => Ok(()),
        Some(_) => Err(AuthError::StateInvalid("state does not match this browser")),
        None => Err(AuthError::StateInvalid("no login in progress for this browser")),
    }
}

async fn logout_impl(
    state: ApiState,
    claims: TokenClaims,
    req: LogoutRequest,
) -> anyhow::Result<Response> {
    end_session(state.tokens(), state.redis_client(), &claims, &req.refresh_token).await?;
    tracing::info!(
        user_id = %claims.user_id,
        session_id = %claims.sid,
        jti = %claims.jti,
        "user logged out"
    );
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Revokes both tokens of the session `access` belongs to.
async fn end_session<R>(
    tokens: &TokenService,
    revoker: &R,
    access: &TokenClaims,
    refresh_token: &str,
) -> anyhow::Result<()>
where
    R: TokenRevoker + ?Sized,
{
    let refresh = tokens.validate_refresh_token(refresh_token).await?;
    if refresh.sid != access.sid {
        return Err(AuthError::Validation("refresh token belongs to another session".to_owned()).into());
    }

    revoker.revoke(access).await?;
    revoker.revoke(&refresh).await?;
    Ok(())
}

// ── Errors ──────────────────────────────────────────────────────────────────

fn error_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// Maps a core error to a status and a fixed public message.
fn auth_error_status(e: &AuthError) -> (StatusCode, &'static str) {
    match e {
        AuthError::StateInvalid(_) => (StatusCode::BAD_REQUEST, "invalid state parameter"),
        AuthError::RedirectMismatch(_) => (StatusCode::BAD_REQUEST, "invalid redirect url"),
        AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid request"),
        AuthError::Expired => (StatusCode::UNAUTHORIZED, "token expired"),
        AuthError::Revoked => (StatusCode::UNAUTHORIZED, "token revoked"),
        e if e.is_token_rejection() => (StatusCode::UNAUTHORIZED, "invalid token"),
        AuthError::ExchangeFailed(_) | AuthError::UserInfoFailed(_) => {
            (StatusCode::BAD_GATEWAY, "identity provider unavailable")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
    }
}

fn auth_error_response(e: &AuthError) -> Response {
    let (status, message) = auth_error_status(e);
    error_response(status, message)
}

fn internal_error_response(e: &anyhow::Error) -> Response {
    match e.downcast_ref::<AuthError>() {
        Some(e) => auth_error_response(e),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
    use axum::http::{HeaderMap, HeaderValue};
    use notes_auth::{BlacklistChecker, BoxError, ProviderFailure, TokenConfig};

    use super::*;

    /// Revocations kept in memory, readable as a blacklist.
    #[derive(Default)]
    struct MemoryRevocations {
        revoked: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl BlacklistChecker for MemoryRevocations {
        async fn is_token_blacklisted(&self, token_id: &str) -> Result<bool, BoxError> {
            Ok(self.revoked.lock().unwrap().contains(token_id))
        }
    }

    #[async_trait]
    impl TokenRevoker for MemoryRevocations {
        async fn revoke(&self, claims: &TokenClaims) -> anyhow::Result<()> {
            self.revoked.lock().unwrap().insert(claims.jti.clone());
            Ok(())
        }
    }

    fn token_service(revocations: Arc<MemoryRevocations>) -> TokenService {
        TokenService::new(b"gateway-test-secret", TokenConfig::default())
            .unwrap()
            .with_blacklist(revocations)
    }

    fn user() -> TokenUser {
        TokenUser {
            id: "user-1".to_owned(),
            email: "user@example.com".to_owned(),
            name: "User".to_owned(),
        }
    }

    fn jar_with_state(state: &str) -> CookieJar {
        let mut headers = HeaderMap::new();
        let cookie = format!("__notes_oauth_state={state}");
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
        CookieJar::from_headers(&headers)
    }

    #[test]
    fn login_sets_state_cookie() {
        let state = notes_auth::generate_secure_state().unwrap();
        let response = login_redirect(
            CookieJar::new(),
            "https://accounts.example.com/auth",
            &state,
            Duration::from_secs(600),
        );

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://accounts.example.com/auth"
        );

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.starts_with(&format!("__notes_oauth_state={state}")));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/auth"));
        assert!(cookie.contains("Max-Age=600"));
    }

    #[test]
    fn callback_state_must_match_cookie() {
        let state = notes_auth::generate_secure_state().unwrap();
        assert!(check_state_binding(&jar_with_state(&state), &state).is_ok());

        let other = notes_auth::generate_secure_state().unwrap();
        assert!(matches!(
            check_state_binding(&jar_with_state(&other), &state),
            Err(AuthError::StateInvalid(_))
        ));
        assert!(matches!(
            check_state_binding(&CookieJar::new(), &state),
            Err(AuthError::StateInvalid(_))
        ));
        assert!(matches!(
            check_state_binding(&jar_with_state(""), ""),
            Err(AuthError::StateInvalid(_))
        ));
    }

    #[tokio::test]
    async fn refresh_fails_after_logout() {
        let revocations = Arc::new(MemoryRevocations::default());
        let tokens = token_service(revocations.clone());
        let pair = tokens.generate_token_pair(&user()).unwrap();
        let access = tokens.validate_token(&pair.access_token).await.unwrap();

        end_session(&tokens, revocations.as_ref(), &access, &pair.refresh_token)
            .await
            .unwrap();

        assert!(matches!(
            tokens.refresh(&pair.refresh_token).await,
            Err(AuthError::Revoked)
        ));
        assert!(matches!(
            tokens.validate_token(&pair.access_token).await,
            Err(AuthError::Revoked)
        ));
    }

    #[tokio::test]
    async fn logout_needs_refresh_token_of_same_session() {
        let revocations = Arc::new(MemoryRevocations::default());
        let tokens = token_service(revocations.clone());
        let mine = tokens.generate_token_pair(&user()).unwrap();
        let theirs = tokens.generate_token_pair(&user()).unwrap();
        let access = tokens.validate_token(&mine.access_token).await.unwrap();

        let e = end_session(&tokens, revocations.as_ref(), &access, &theirs.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(
            e.downcast_ref::<AuthError>(),
            Some(AuthError::Validation(_))
        ));
        assert!(revocations.revoked.lock().unwrap().is_empty());
        tokens.refresh(&theirs.refresh_token).await.unwrap();
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn error_status_mapping() {
        let provider = ProviderFailure {
            status: Some(500),
            timed_out: false,
            malformed: false,
            detail: "boom".to_owned(),
        };
        let cases = [
            (AuthError::StateInvalid("state is empty"), StatusCode::BAD_REQUEST),
            (AuthError::RedirectMismatch("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::Expired, StatusCode::UNAUTHORIZED),
            (AuthError::Revoked, StatusCode::UNAUTHORIZED),
            (AuthError::InvalidIssuer, StatusCode::UNAUTHORIZED),
            (AuthError::Parse("bad".into()), StatusCode::UNAUTHORIZED),
            (AuthError::ExchangeFailed(provider), StatusCode::BAD_GATEWAY),
            (AuthError::Signing("key".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AuthError::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(auth_error_status(&error).0, status, "{error}");
        }
    }

    #[test]
    fn anyhow_wrapped_errors_keep_their_status() {
        let e = anyhow::Error::from(AuthError::StateInvalid("state not found"));
        assert_eq!(internal_error_response(&e).status(), StatusCode::BAD_REQUEST);

        let e = anyhow::anyhow!("redis down");
        assert_eq!(
            internal_error_response(&e).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
