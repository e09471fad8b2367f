//! Staff-only account administration and audit review.

use axum::Json;
use axum::extract::{Path, Query, State};
use fixit_core::models::auth::AccountStatus;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::JsonBody;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::client::ClientInfo;
use crate::models::{AuditListResponse, AuditQuery, StatusChangeResponse, UpdateStatusRequest};

/// Default and maximum page sizes for `GET /admin/audit`.
const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 500;

/// `PATCH /admin/users/{userId}/status`: change an account's status.
///
/// Leaving `active` revokes every refresh token of the account.
pub async fn update_status_handler(
    State(state): State<AppState>,
    ClientInfo(client): ClientInfo,
    axum::Extension(actor): axum::Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
    JsonBody(body): JsonBody<UpdateStatusRequest>,
) -> AppResult<Json<StatusChangeResponse>> {
    let status: AccountStatus = body.status.parse().map_err(AppError::Validation)?;
    let previous = state
        .sessions
        .change_status(&actor.0, user_id, status, &client)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(StatusChangeResponse {
        user_id,
        previous_status: previous,
        status,
    }))
}

/// `GET /admin/audit?limit=N`: most recent audit entries, newest first.
pub async fn list_audit_handler(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<AuditListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let entries = state.sessions.recent_audit(limit).await?;
    Ok(Json(AuditListResponse {
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}
