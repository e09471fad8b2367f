//! Authentication and session request handlers.
//!
//! Tokens travel only in httpOnly cookies; response bodies carry the user and
//! expiry information.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum_extra::extract::CookieJar;
use fixit_core::auth::AuthError;
use fixit_core::auth::session::{IssuedSession, RefreshedSession};
use fixit_core::auth::store::reasons;
use fixit_core::models::auth::UserAccount;
use tracing::warn;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::JsonBody;
use crate::middleware::auth::{AuthenticatedUser, access_token};
use crate::middleware::client::ClientInfo;
use crate::models::{
    AuthResponse, LoginRequest, LogoutAllResponse, LogoutResponse, MeResponse, RegisterRequest,
    SessionListResponse,
};
use crate::services::auth;
use crate::services::cookies::{self, REFRESH_COOKIE};

fn auth_response(user: UserAccount, session: &IssuedSession, access_ttl_ms: i64) -> AuthResponse {
    AuthResponse {
        user: user.into(),
        expires_in: access_ttl_ms / 1000,
        access_expires_at: session.access_expires_at,
    }
}

fn with_session_cookies(state: &AppState, jar: CookieJar, session: &IssuedSession) -> CookieJar {
    let auth = &state.config.auth;
    cookies::set_session(
        jar,
        &state.config.cookies,
        session,
        auth.access_token_ttl_ms,
        auth.refresh_token_ttl_ms,
    )
}

/// `POST /auth/register`: create a Tenant account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    jar: CookieJar,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<AuthResponse>)> {
    let signed_in = auth::register(&state, body, &client).await?;
    let jar = with_session_cookies(&state, jar, &signed_in.session);
    let body = auth_response(
        signed_in.user,
        &signed_in.session,
        state.config.auth.access_token_ttl_ms,
    );
    Ok((StatusCode::CREATED, jar, Json(body)))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    jar: CookieJar,
    JsonBody(body): JsonBody<LoginRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let signed_in = auth::login(&state, body, &client).await?;
    let jar = with_session_cookies(&state, jar, &signed_in.session);
    let body = auth_response(
        signed_in.user,
        &signed_in.session,
        state.config.auth.access_token_ttl_ms,
    );
    Ok((jar, Json(body)))
}

/// `POST /auth/refresh`: rotate the refresh cookie and mint a new access token.
///
/// Any authentication failure clears both cookies so the client re-authenticates.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AuthResponse>), (CookieJar, AppError)> {
    let Some(raw) = cookies::read(&jar, REFRESH_COOKIE) else {
        return Err((jar, AppError::unauthenticated()));
    };

    match state.sessions.refresh_session(&raw, &client).await {
        Ok(RefreshedSession { user, session }) => {
            let jar = with_session_cookies(&state, jar, &session);
            let body = auth_response(user, &session, state.config.auth.access_token_ttl_ms);
            Ok((jar, Json(body)))
        }
        Err(e) => {
            let err = AppError::from(e);
            let status = err.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                warn!(status = status.as_u16(), "refresh rejected, clearing session cookies");
                Err((cookies::clear_session(jar, &state.config.cookies), err))
            } else {
                Err((jar, err))
            }
        }
    }
}

/// `POST /auth/logout`: revoke the presented credentials and clear cookies.
///
/// Works without a valid access token; whatever credentials are present are
/// revoked.
pub async fn logout_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<LogoutResponse>)> {
    let claims = access_token(&headers).and_then(|t| state.sessions.codec().verify_access(&t).ok());
    let refresh = cookies::read(&jar, REFRESH_COOKIE);

    state
        .sessions
        .logout(claims.as_ref(), refresh.as_deref(), &client)
        .await?;

    Ok((
        cookies::clear_session(jar, &state.config.cookies),
        Json(LogoutResponse { success: true }),
    ))
}

/// `GET /auth/me`: the authenticated account.
pub async fn me_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<MeResponse>> {
    let account = state
        .sessions
        .users()
        .find_by_id(user.0.user_id)
        .await?
        .ok_or(AuthError::AccountNotFound)?;
    Ok(Json(MeResponse {
        user: account.into(),
        session_expires_at: user.0.expires_at,
    }))
}

/// `POST /auth/logout-all`: end every session of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<LogoutAllResponse>)> {
    let revoked_tokens = state.sessions.logout_everywhere(&user.0, &client).await?;
    Ok((
        cookies::clear_session(jar, &state.config.cookies),
        Json(LogoutAllResponse { revoked_tokens }),
    ))
}

/// `GET /auth/sessions`: the caller's active sessions.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<SessionListResponse>> {
    let sessions = state.sessions.list_active_sessions(user.0.user_id).await?;
    Ok(Json(SessionListResponse {
        sessions: sessions.into_iter().map(Into::into).collect(),
    }))
}

/// `DELETE /auth/sessions/{familyId}`: revoke one of the caller's sessions.
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Path(family_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let revoked = state
        .sessions
        .revoke_token_family(user.0.user_id, family_id, reasons::SESSION_REVOKED, &client)
        .await?;
    if revoked == 0 {
        return Err(AppError::NotFound("Session not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}
