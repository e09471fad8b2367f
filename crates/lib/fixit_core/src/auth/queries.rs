//! PostgreSQL-backed token store and user directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::AuthError;
use super::store::{
    CreatedSession, RotationOutcome, TokenStore, UserDirectory, families_to_evict, reasons,
};
use crate::db::with_transaction;
use crate::models::auth::{
    AccountStatus, AuditEntry, NewRefreshToken, NewUser, Principal, RefreshReplacement,
    RefreshTokenRecord, RevokedAccessJti, Role, UserAccount, UserWithPassword,
};
use crate::uuid::uuidv7;

const REFRESH_COLUMNS: &str = "id, user_id, token_hash, family_id, issued_at, expires_at, \
     revoked_at, replaced_by_token_id, revocation_reason, user_agent, ip";

const USER_COLUMNS: &str = "id, email, name, role, status, created_at, password_hash";

#[derive(FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    family_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    replaced_by_token_id: Option<Uuid>,
    revocation_reason: Option<String>,
    user_agent: Option<String>,
    ip: Option<String>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            family_id: row.family_id,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            replaced_by_token_id: row.replaced_by_token_id,
            revocation_reason: row.revocation_reason,
            user_agent: row.user_agent,
            ip: row.ip,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    role: String,
    status: String,
    created_at: DateTime<Utc>,
    password_hash: Option<String>,
}

impl UserRow {
    fn into_parts(self) -> Result<(UserAccount, Option<String>), AuthError> {
        let role: Role = self.role.parse().map_err(AuthError::Internal)?;
        let status: AccountStatus = self.status.parse().map_err(AuthError::Internal)?;
        let account = UserAccount {
            id: self.id,
            email: self.email,
            name: self.name,
            role,
            status,
            created_at: self.created_at,
        };
        Ok((account, self.password_hash))
    }
}

#[derive(FromRow)]
struct AuditRow {
    actor_user_id: Option<Uuid>,
    target_user_id: Option<Uuid>,
    action: String,
    metadata: serde_json::Value,
    ip: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AuthError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            actor_user_id: row.actor_user_id,
            target_user_id: row.target_user_id,
            action: row.action.parse().map_err(AuthError::Internal)?,
            metadata: row.metadata,
            ip: row.ip,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
    }
}

/// Insert one refresh token and return the stored row.
async fn insert_refresh_token(
    conn: &mut sqlx::PgConnection,
    token: &NewRefreshToken,
) -> Result<RefreshTokenRecord, AuthError> {
    let sql = format!(
        "INSERT INTO refresh_tokens \
         (id, user_id, token_hash, family_id, issued_at, expires_at, user_agent, ip) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {REFRESH_COLUMNS}"
    );
    let row = sqlx::query_as::<_, RefreshTokenRow>(&sql)
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.family_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(&token.user_agent)
        .bind(&token.ip)
        .fetch_one(conn)
        .await?;
    Ok(row.into())
}

/// Refresh tokens, the revoked-access registry and the audit log in PostgreSQL.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create_session(
        &self,
        token: NewRefreshToken,
        max_active: usize,
    ) -> Result<CreatedSession, AuthError> {
        with_transaction::<CreatedSession, AuthError, _>(&self.pool, move |conn| {
            Box::pin(async move {
                // Serialize issuance per user so concurrent logins cannot both
                // slip under the cap.
                sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
                    .bind(token.user_id)
                    .execute(&mut *conn)
                    .await?;

                let sql = format!(
                    "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
                     WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > now() \
                     FOR UPDATE"
                );
                let active: Vec<RefreshTokenRecord> =
                    sqlx::query_as::<_, RefreshTokenRow>(&sql)
                        .bind(token.user_id)
                        .fetch_all(&mut *conn)
                        .await?
                        .into_iter()
                        .map(Into::into)
                        .collect();

                let evicted_families = families_to_evict(&active, max_active);
                if !evicted_families.is_empty() {
                    sqlx::query(
                        "UPDATE refresh_tokens SET revoked_at = now(), revocation_reason = $3 \
                         WHERE user_id = $1 AND family_id = ANY($2) AND revoked_at IS NULL",
                    )
                    .bind(token.user_id)
                    .bind(&evicted_families)
                    .bind(reasons::MAX_SESSIONS_EXCEEDED)
                    .execute(&mut *conn)
                    .await?;
                }

                let record = insert_refresh_token(&mut *conn, &token).await?;
                Ok(CreatedSession {
                    record,
                    evicted_families,
                })
            })
        })
        .await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let sql = format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE token_hash = $1 AND expires_at > now()"
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement: RefreshReplacement,
    ) -> Result<RotationOutcome, AuthError> {
        let token_hash = token_hash.to_string();
        with_transaction::<RotationOutcome, AuthError, _>(&self.pool, move |conn| {
            Box::pin(async move {
                // The row lock makes a concurrent rotation of the same token
                // wait here, then observe it as spent.
                let sql = format!(
                    "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
                     WHERE token_hash = $1 AND expires_at > now() \
                     FOR UPDATE"
                );
                let Some(previous) = sqlx::query_as::<_, RefreshTokenRow>(&sql)
                    .bind(&token_hash)
                    .fetch_optional(&mut *conn)
                    .await?
                    .map(RefreshTokenRecord::from)
                else {
                    return Ok(RotationOutcome::NotFound);
                };

                if previous.is_spent() {
                    let revoked = sqlx::query(
                        "UPDATE refresh_tokens SET revoked_at = now(), revocation_reason = $2 \
                         WHERE family_id = $1 AND revoked_at IS NULL",
                    )
                    .bind(previous.family_id)
                    .bind(reasons::REUSE_DETECTED)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected();
                    return Ok(RotationOutcome::Reused {
                        record: previous,
                        revoked,
                    });
                }

                let current =
                    insert_refresh_token(&mut *conn, &replacement.for_predecessor(&previous))
                        .await?;

                let sql = format!(
                    "UPDATE refresh_tokens \
                     SET revoked_at = now(), replaced_by_token_id = $2, revocation_reason = $3 \
                     WHERE id = $1 \
                     RETURNING {REFRESH_COLUMNS}"
                );
                let previous: RefreshTokenRecord = sqlx::query_as::<_, RefreshTokenRow>(&sql)
                    .bind(previous.id)
                    .bind(current.id)
                    .bind(reasons::ROTATED)
                    .fetch_one(&mut *conn)
                    .await?
                    .into();

                Ok(RotationOutcome::Rotated { previous, current })
            })
        })
        .await
    }

    async fn revoke_family(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        reason: &str,
    ) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now(), revocation_reason = $3 \
             WHERE user_id = $1 AND family_id = $2 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(family_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now(), revocation_reason = $2 \
             WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_tokens(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let sql = format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > now() \
             ORDER BY issued_at DESC"
        );
        let rows = sqlx::query_as::<_, RefreshTokenRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn revoke_access_jti(&self, entry: RevokedAccessJti) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO revoked_access_tokens (jti, user_id, expires_at, reason) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(&entry.jti)
        .bind(entry.user_id)
        .bind(entry.expires_at)
        .bind(&entry.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_access_jti_revoked(&self, jti: &str) -> Result<bool, AuthError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM revoked_access_tokens \
             WHERE jti = $1 AND expires_at > now())",
        )
        .bind(jti)
        .fetch_one(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn purge_expired_revocations(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM revoked_access_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO audit_log \
             (id, actor_user_id, target_user_id, action, metadata, ip, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(uuidv7())
        .bind(entry.actor_user_id)
        .bind(entry.target_user_id)
        .bind(entry.action.as_str())
        .bind(&entry.metadata)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, AuthError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT actor_user_id, target_user_id, action, metadata, ip, user_agent, created_at \
             FROM audit_log ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

/// The `users` table seen through [`UserDirectory`].
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn principal(&self, user_id: Uuid) -> Result<Option<Principal>, AuthError> {
        Ok(self.find_by_id(user_id).await?.map(|u| u.principal()))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserAccount>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.into_parts().map(|(account, _)| account))
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            r.into_parts()
                .map(|(user, password_hash)| UserWithPassword {
                    user,
                    password_hash,
                })
        })
        .transpose()
    }

    async fn create_user(&self, user: NewUser) -> Result<UserAccount, AuthError> {
        let sql = format!(
            "INSERT INTO users (id, email, name, password_hash, role, status) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT DO NOTHING \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(uuidv7())
            .bind(user.email.trim())
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.status.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.into_parts()?.0),
            None => Err(AuthError::Conflict("Email already registered".into())),
        }
    }

    async fn set_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<AccountStatus>, AuthError> {
        let previous = sqlx::query_scalar::<_, String>(
            "UPDATE users u SET status = $2, updated_at = now() \
             FROM (SELECT id, status FROM users WHERE id = $1 FOR UPDATE) prev \
             WHERE u.id = prev.id \
             RETURNING prev.status",
        )
        .bind(user_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        previous
            .map(|s| s.parse::<AccountStatus>().map_err(AuthError::Internal))
            .transpose()
    }
}
