use std::time::Duration;

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

const STATE_COOKIE_NAME: &str = "__notes_oauth_state";
const STATE_COOKIE_PATH: &str = "/auth";

/// Binds a login attempt to the browser that started it.
pub(super) fn state_cookie(state: &str, ttl: Duration) -> Cookie<'static> {
    let max_age = time::Duration::try_from(ttl).unwrap_or(time::Duration::minutes(10));

    Cookie::build((STATE_COOKIE_NAME, state.to_owned()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path(STATE_COOKIE_PATH)
        .max_age(max_age)
        .build()
}

pub(super) fn clear_state_cookie() -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, ""))
        .path(STATE_COOKIE_PATH)
        .max_age(time::Duration::ZERO)
        .build()
}

pub(super) fn get_state(jar: &CookieJar) -> Option<&str> {
    jar.get(STATE_COOKIE_NAME).map(|cookie| cookie.value())
}
