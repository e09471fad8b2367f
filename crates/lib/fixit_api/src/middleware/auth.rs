//! Authentication middleware and role gates.
//!
//! [`require_auth`] runs the full pipeline (token extraction, signature and
//! expiry, revoked-jti registry, live account status) and attaches
//! [`AuthenticatedUser`]. The gates run after it and only read that
//! extension.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use fixit_core::auth::session::AuthContext;
use fixit_core::models::auth::Role;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::{self, ACCESS_COOKIE};

/// Key used to store the [`AuthContext`] in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AuthContext);

/// Access token from `Authorization: Bearer`, falling back to the access cookie.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    bearer.or_else(|| cookies::read(&CookieJar::from_headers(headers), ACCESS_COOKIE))
}

/// Axum middleware: authenticates the request and injects
/// [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = access_token(request.headers()).ok_or_else(AppError::unauthenticated)?;

    let ctx = state.sessions.authenticate(&token).await.map_err(|e| {
        debug!(error = %e, path = %request.uri().path(), "authentication failed");
        AppError::from(e)
    })?;

    request.extensions_mut().insert(AuthenticatedUser(ctx));
    Ok(next.run(request).await)
}

fn authenticated(request: &Request) -> Result<&AuthContext, AppError> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| &u.0)
        .ok_or_else(AppError::unauthenticated)
}

/// Hierarchy gate: the caller's role must rank at least `required`.
///
/// Use with `axum::middleware::from_fn_with_state(Role::Staff, require_min_role)`.
pub async fn require_min_role(
    State(required): State<Role>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = authenticated(&request)?;
    if !ctx.role.at_least(required) {
        debug!(user_id = %ctx.user_id, role = %ctx.role, %required, "role below required level");
        return Err(AppError::Forbidden("Insufficient privileges".into()));
    }
    Ok(next.run(request).await)
}

/// Exact-role gate: the caller's role must be one of `allowed`.
pub async fn require_any_role(
    State(allowed): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = authenticated(&request)?;
    if !allowed.contains(&ctx.role) {
        debug!(user_id = %ctx.user_id, role = %ctx.role, "role not in allowed set");
        return Err(AppError::Forbidden("Insufficient privileges".into()));
    }
    Ok(next.run(request).await)
}
