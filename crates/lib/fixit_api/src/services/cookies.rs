//! Cookie service: build, read and clear the httpOnly auth cookies.
//!
//! The access cookie is sent on every path. The refresh cookie is scoped to
//! `/auth`, where refresh and logout live, and uses the stricter SameSite.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use fixit_core::auth::session::IssuedSession;
use time::Duration;

use crate::config::CookieConfig;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "fixit_access";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "fixit_refresh";

pub const ACCESS_COOKIE_PATH: &str = "/";
pub const REFRESH_COOKIE_PATH: &str = "/auth";

fn build(
    config: &CookieConfig,
    name: &'static str,
    value: String,
    path: &'static str,
    same_site: SameSite,
    max_age: Duration,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site)
        .path(path)
        .max_age(max_age);
    if let Some(domain) = &config.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Build the access cookie; `Max-Age` is the token's lifetime.
pub fn access_cookie(config: &CookieConfig, token: &str, ttl_ms: i64) -> Cookie<'static> {
    build(
        config,
        ACCESS_COOKIE,
        token.to_string(),
        ACCESS_COOKIE_PATH,
        config.access_same_site,
        Duration::milliseconds(ttl_ms),
    )
}

/// Build the refresh cookie; `Max-Age` is the token's lifetime.
pub fn refresh_cookie(config: &CookieConfig, token: &str, ttl_ms: i64) -> Cookie<'static> {
    build(
        config,
        REFRESH_COOKIE,
        token.to_string(),
        REFRESH_COOKIE_PATH,
        config.refresh_same_site,
        Duration::milliseconds(ttl_ms),
    )
}

pub fn clear_access_cookie(config: &CookieConfig) -> Cookie<'static> {
    build(
        config,
        ACCESS_COOKIE,
        String::new(),
        ACCESS_COOKIE_PATH,
        config.access_same_site,
        Duration::ZERO,
    )
}

pub fn clear_refresh_cookie(config: &CookieConfig) -> Cookie<'static> {
    build(
        config,
        REFRESH_COOKIE,
        String::new(),
        REFRESH_COOKIE_PATH,
        config.refresh_same_site,
        Duration::ZERO,
    )
}

/// Add both session cookies to the jar.
pub fn set_session(
    jar: CookieJar,
    config: &CookieConfig,
    session: &IssuedSession,
    access_ttl_ms: i64,
    refresh_ttl_ms: i64,
) -> CookieJar {
    jar.add(access_cookie(config, &session.access_token, access_ttl_ms))
        .add(refresh_cookie(config, &session.refresh_token, refresh_ttl_ms))
}

/// Overwrite both session cookies with empty, already-expired values.
pub fn clear_session(jar: CookieJar, config: &CookieConfig) -> CookieJar {
    jar.add(clear_access_cookie(config))
        .add(clear_refresh_cookie(config))
}

/// Non-empty value of a cookie.
pub fn read(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
