//! Authentication service: registration and login flows on top of
//! `fixit_core::auth`.

use fixit_core::auth::AuthError;
use fixit_core::auth::password::{MIN_PASSWORD_LEN, hash_password, verify_password};
use fixit_core::auth::session::IssuedSession;
use fixit_core::models::auth::{
    AccountStatus, AuditAction, ClientContext, NewUser, Role, UserAccount,
};
use serde_json::json;
use tracing::{debug, info};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{LoginRequest, RegisterRequest};

/// A user together with the session just issued for them.
pub struct SignedIn {
    pub user: UserAccount,
    pub session: IssuedSession,
}

/// bcrypt is CPU-bound; keep it off the async workers.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))?
        .map_err(AppError::from)
}

fn validate_email(email: &str) -> AppResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation("A valid email address is required".into()))
    }
}

/// Create a Tenant account and start its first session.
pub async fn register(
    state: &AppState,
    req: RegisterRequest,
    client: &ClientContext,
) -> AppResult<SignedIn> {
    let email = req.email.trim().to_string();
    validate_email(&email)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let cost = state.sessions.config().bcrypt_cost;
    let password = req.password;
    let password_hash = blocking(move || hash_password(&password, cost)).await?;

    let user = state
        .sessions
        .users()
        .create_user(NewUser {
            email,
            name,
            password_hash,
            role: Role::Tenant,
            status: AccountStatus::Active,
        })
        .await?;

    let session = state
        .sessions
        .issue_session(&user.principal(), client)
        .await?;
    state
        .sessions
        .audit()
        .event(
            AuditAction::Register,
            Some(user.id),
            Some(user.id),
            client,
            json!({ "familyId": session.family_id }),
        )
        .await;
    info!(user_id = %user.id, "user registered");

    Ok(SignedIn { user, session })
}

/// Verify credentials and start a new session.
///
/// Unknown email and wrong password are the same 401. Account status is
/// checked only after the password, so status never leaks without it.
pub async fn login(
    state: &AppState,
    req: LoginRequest,
    client: &ClientContext,
) -> AppResult<SignedIn> {
    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::Validation("Email and password are required".into()));
    }

    let found = state.sessions.users().find_by_email(email).await?;
    let Some((user, stored_hash)) =
        found.and_then(|f| f.password_hash.map(|hash| (f.user, hash)))
    else {
        debug!("login for unknown email");
        return Err(AuthError::InvalidCredentials.into());
    };

    let password = req.password;
    if !blocking(move || verify_password(&password, &stored_hash)).await? {
        debug!(user_id = %user.id, "login with wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    if !user.status.is_active() {
        info!(user_id = %user.id, status = %user.status, "login refused for inactive account");
        return Err(AuthError::AccountInactive(user.status).into());
    }

    let session = state
        .sessions
        .issue_session(&user.principal(), client)
        .await?;
    state
        .sessions
        .audit()
        .event(
            AuditAction::Login,
            Some(user.id),
            Some(user.id),
            client,
            json!({ "familyId": session.family_id }),
        )
        .await;
    info!(user_id = %user.id, "user logged in");

    Ok(SignedIn { user, session })
}
