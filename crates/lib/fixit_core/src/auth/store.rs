//! Storage seams of the session core.
//!
//! [`TokenStore`] persists refresh-token families, the revoked-access
//! registry and the audit log. [`UserDirectory`] is the read/write view of
//! user accounts that the core consumes but does not own.
//!
//! Implementations:
//! - [`super::queries::PgTokenStore`] / [`super::queries::PgUserDirectory`]: PostgreSQL
//! - [`super::memory::MemoryTokenStore`] / [`super::memory::MemoryUserDirectory`]: in-process

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{
    AccountStatus, AuditEntry, NewRefreshToken, NewUser, Principal, RefreshReplacement,
    RefreshTokenRecord, RevokedAccessJti, UserAccount, UserWithPassword,
};

/// Revocation reasons recorded on refresh-token rows.
pub mod reasons {
    pub const ROTATED: &str = "rotated";
    pub const REUSE_DETECTED: &str = "reuse-detected";
    pub const MAX_SESSIONS_EXCEEDED: &str = "max-sessions-exceeded";
    pub const LOGOUT: &str = "logout";
    pub const LOGOUT_ALL: &str = "logout-all";
    pub const STATUS_CHANGE: &str = "status-change";
    pub const SESSION_REVOKED: &str = "session-revoked";
}

/// Result of inserting the first token of a new family.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub record: RefreshTokenRecord,
    /// Families revoked to keep the user within the session cap.
    pub evicted_families: Vec<Uuid>,
}

/// Result of an atomic rotation attempt.
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// The presented token was live; it now points at `current`.
    Rotated {
        previous: RefreshTokenRecord,
        current: RefreshTokenRecord,
    },
    /// The presented token was already spent; its whole family was revoked
    /// in the same transaction.
    Reused {
        record: RefreshTokenRecord,
        revoked: u64,
    },
    /// No unexpired row matches the presented token.
    NotFound,
}

/// Persistence for refresh tokens, revoked access jti's and audit entries.
///
/// `create_session` and `rotate_refresh_token` must each be atomic: the
/// PostgreSQL implementation runs them in one transaction and row-locks the
/// rows it decides on, so two concurrent rotations of the same token can
/// never both succeed.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Revoke the user's least recently refreshed families beyond
    /// `max_active - 1`, then insert `token` as the start of a new family.
    async fn create_session(
        &self,
        token: NewRefreshToken,
        max_active: usize,
    ) -> Result<CreatedSession, AuthError>;

    /// Look up an unexpired token by hash, spent or not.
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Lock the unexpired row matching `token_hash`; if it is spent, revoke
    /// its family, otherwise insert `replacement` in the same family and
    /// mark the old row revoked and replaced.
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement: RefreshReplacement,
    ) -> Result<RotationOutcome, AuthError>;

    /// Revoke every unrevoked token of one family. Returns rows revoked.
    async fn revoke_family(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        reason: &str,
    ) -> Result<u64, AuthError>;

    /// Revoke every unrevoked token of the user, across all families.
    async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> Result<u64, AuthError>;

    /// Active (unrevoked, unexpired) tokens of the user, newest first.
    async fn list_active_tokens(&self, user_id: Uuid)
    -> Result<Vec<RefreshTokenRecord>, AuthError>;

    /// Add an access jti to the registry. Re-adding an existing jti is a no-op.
    async fn revoke_access_jti(&self, entry: RevokedAccessJti) -> Result<(), AuthError>;

    /// Whether a non-expired registry row exists for `jti`.
    async fn is_access_jti_revoked(&self, jti: &str) -> Result<bool, AuthError>;

    /// Delete registry rows whose `expires_at <= now`. Returns rows deleted.
    async fn purge_expired_revocations(&self) -> Result<u64, AuthError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AuthError>;

    /// Most recent audit entries, newest first.
    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, AuthError>;
}

/// User accounts as seen by the session core.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Live `{id, role, status}`; never cached by callers.
    async fn principal(&self, user_id: Uuid) -> Result<Option<Principal>, AuthError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserAccount>, AuthError>;

    /// Email lookup is case-insensitive.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError>;

    /// Fails with [`AuthError::Conflict`] when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<UserAccount, AuthError>;

    /// Returns the previous status, or `None` if the user does not exist.
    async fn set_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<AccountStatus>, AuthError>;
}

/// Pick the families to revoke so that, after one more family is added, at
/// most `max_active` remain. Families are ordered by their most recent
/// issuance; the least recently refreshed go first.
pub fn families_to_evict(active: &[RefreshTokenRecord], max_active: usize) -> Vec<Uuid> {
    let mut last_issued: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    for token in active {
        last_issued
            .entry(token.family_id)
            .and_modify(|at| {
                if token.issued_at > *at {
                    *at = token.issued_at;
                }
            })
            .or_insert(token.issued_at);
    }

    let keep = max_active.max(1) - 1;
    if last_issued.len() <= keep {
        return Vec::new();
    }

    let mut families: Vec<(Uuid, DateTime<Utc>)> = last_issued.into_iter().collect();
    families.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let excess = families.len() - keep;
    families.into_iter().take(excess).map(|(id, _)| id).collect()
}
