//! Session manager: issues, rotates, revokes and introspects sessions.
//!
//! A session is a refresh-token family. Every login starts a new family;
//! every refresh replaces the family's single live token with a new one.
//! Presenting a token that was already replaced or revoked kills the family.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::audit::AuditLog;
use super::jwt::{TokenCodec, hash_refresh_token, make_refresh_secret};
use super::store::{RotationOutcome, TokenStore, UserDirectory, reasons};
use crate::config::AuthConfig;
use crate::models::auth::{
    AccessClaims, AccountStatus, AuditAction, AuditEntry, ClientContext, NewRefreshToken,
    Principal, RefreshReplacement, RevokedAccessJti, Role, UserAccount,
};
use crate::uuid::uuidv7;

/// Credentials handed to the client after login, registration or refresh.
/// `refresh_token` is the raw secret and is never readable again.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub user_id: Uuid,
    pub role: Role,
    pub access_token: String,
    pub access_jti: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
    pub family_id: Uuid,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Result of a successful refresh: the rotated credentials and their owner.
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub user: UserAccount,
    pub session: IssuedSession,
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    /// Role snapshot from the access token.
    pub role: Role,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// One active session of a user, described by its live token.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub family_id: Uuid,
    pub token_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone)]
pub struct SessionManager {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserDirectory>,
    codec: TokenCodec,
    audit: AuditLog,
    config: Arc<AuthConfig>,
}

impl SessionManager {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        config: AuthConfig,
    ) -> Self {
        let codec = TokenCodec::new(config.jwt_secret.as_bytes(), config.access_token_ttl_ms);
        Self {
            audit: AuditLog::new(tokens.clone()),
            tokens,
            users,
            codec,
            config: Arc::new(config),
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Start a new session for `principal`.
    ///
    /// Evicts the user's least recently refreshed sessions beyond the cap and
    /// inserts the new family in one transaction. Auditing the triggering
    /// login or registration is left to the caller.
    pub async fn issue_session(
        &self,
        principal: &Principal,
        client: &ClientContext,
    ) -> Result<IssuedSession, AuthError> {
        if !principal.status.is_active() {
            return Err(AuthError::AccountInactive(principal.status));
        }

        let access = self.codec.sign_access(principal)?;
        let secret = make_refresh_secret();
        let now = Utc::now();
        let token = NewRefreshToken {
            id: uuidv7(),
            user_id: principal.id,
            token_hash: secret.hash,
            family_id: uuidv7(),
            issued_at: now,
            expires_at: now + self.config.refresh_token_ttl(),
            user_agent: client.user_agent.clone(),
            ip: client.ip.clone(),
        };

        let created = self
            .tokens
            .create_session(token, self.config.max_sessions_per_user)
            .await?;
        if !created.evicted_families.is_empty() {
            info!(
                user_id = %principal.id,
                evicted = created.evicted_families.len(),
                "session cap reached, revoked oldest sessions"
            );
        }
        debug!(user_id = %principal.id, family_id = %created.record.family_id, "session issued");

        Ok(IssuedSession {
            user_id: principal.id,
            role: principal.role,
            access_token: access.token,
            access_jti: access.jti,
            access_expires_at: access.expires_at,
            refresh_token: secret.raw,
            refresh_token_id: created.record.id,
            family_id: created.record.family_id,
            refresh_expires_at: created.record.expires_at,
        })
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// Fails with [`AuthError::InvalidToken`] for unknown or expired tokens and
    /// with [`AuthError::TokenReuseDetected`] when the token was already
    /// spent, in which case its whole family has been revoked.
    pub async fn rotate_refresh_token(
        &self,
        raw_token: &str,
        client: &ClientContext,
    ) -> Result<IssuedSession, AuthError> {
        self.refresh_session(raw_token, client)
            .await
            .map(|refreshed| refreshed.session)
    }

    /// [`rotate_refresh_token`](Self::rotate_refresh_token), also returning
    /// the account it was issued for.
    ///
    /// Everything that can fail runs before the rotation commits; once the
    /// presented token is spent, the caller always receives its successor.
    pub async fn refresh_session(
        &self,
        raw_token: &str,
        client: &ClientContext,
    ) -> Result<RefreshedSession, AuthError> {
        let token_hash = hash_refresh_token(raw_token);
        let record = self
            .tokens
            .find_refresh_token(&token_hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let principal = user.principal();

        if !principal.status.is_active() && !record.is_spent() {
            let revoked = self
                .tokens
                .revoke_all_for_user(principal.id, reasons::STATUS_CHANGE)
                .await?;
            warn!(
                user_id = %principal.id,
                status = %principal.status,
                revoked,
                "refresh attempted by inactive account"
            );
            return Err(AuthError::AccountInactive(principal.status));
        }

        // Signed before the rotation commits so a signing failure leaves the
        // presented token valid.
        let access = self.codec.sign_access(&principal)?;
        let secret = make_refresh_secret();
        let now = Utc::now();
        let replacement = RefreshReplacement {
            id: uuidv7(),
            token_hash: secret.hash,
            issued_at: now,
            expires_at: now + self.config.refresh_token_ttl(),
            user_agent: client.user_agent.clone(),
            ip: client.ip.clone(),
        };

        match self
            .tokens
            .rotate_refresh_token(&token_hash, replacement)
            .await?
        {
            RotationOutcome::NotFound => Err(AuthError::InvalidToken),
            RotationOutcome::Reused { record, revoked } => {
                warn!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    token_id = %record.id,
                    revoked,
                    "refresh token reuse detected, family revoked"
                );
                self.audit
                    .event(
                        AuditAction::RefreshReuse,
                        None,
                        Some(record.user_id),
                        client,
                        json!({
                            "familyId": record.family_id,
                            "tokenId": record.id,
                            "revoked": revoked,
                        }),
                    )
                    .await;
                Err(AuthError::TokenReuseDetected)
            }
            RotationOutcome::Rotated { previous, current } => {
                debug!(
                    user_id = %current.user_id,
                    family_id = %current.family_id,
                    "refresh token rotated"
                );
                self.audit
                    .event(
                        AuditAction::TokenRotated,
                        Some(current.user_id),
                        Some(current.user_id),
                        client,
                        json!({
                            "familyId": current.family_id,
                            "previousTokenId": previous.id,
                            "tokenId": current.id,
                        }),
                    )
                    .await;
                let session = IssuedSession {
                    user_id: principal.id,
                    role: principal.role,
                    access_token: access.token,
                    access_jti: access.jti,
                    access_expires_at: access.expires_at,
                    refresh_token: secret.raw,
                    refresh_token_id: current.id,
                    family_id: current.family_id,
                    refresh_expires_at: current.expires_at,
                };
                Ok(RefreshedSession { user, session })
            }
        }
    }

    /// Revoke every live token of one of the user's families.
    pub async fn revoke_token_family(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        reason: &str,
        client: &ClientContext,
    ) -> Result<u64, AuthError> {
        let revoked = self.tokens.revoke_family(user_id, family_id, reason).await?;
        if revoked > 0 {
            self.audit
                .event(
                    AuditAction::TokenFamilyRevoked,
                    Some(user_id),
                    Some(user_id),
                    client,
                    json!({ "familyId": family_id, "reason": reason, "revoked": revoked }),
                )
                .await;
        }
        Ok(revoked)
    }

    /// Revoke every live refresh token of the user across all families.
    pub async fn revoke_all_user_refresh_tokens(
        &self,
        actor: Option<Uuid>,
        user_id: Uuid,
        reason: &str,
        client: &ClientContext,
    ) -> Result<u64, AuthError> {
        let revoked = self.tokens.revoke_all_for_user(user_id, reason).await?;
        info!(%user_id, reason, revoked, "revoked all refresh tokens");
        self.audit
            .event(
                AuditAction::AllTokensRevoked,
                actor,
                Some(user_id),
                client,
                json!({ "reason": reason, "revoked": revoked }),
            )
            .await;
        Ok(revoked)
    }

    /// Make an access token unusable until its own expiry.
    pub async fn add_revoked_access_jti(
        &self,
        jti: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), AuthError> {
        self.tokens
            .revoke_access_jti(RevokedAccessJti {
                jti: jti.to_string(),
                user_id,
                expires_at,
                reason: reason.to_string(),
            })
            .await
    }

    /// Verify an access token, reject revoked jti's and check the account's
    /// live status.
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let claims = self.codec.verify_access(token)?;

        if self.tokens.is_access_jti_revoked(&claims.jti).await? {
            debug!(jti = %claims.jti, "revoked access token presented");
            return Err(AuthError::InvalidToken);
        }

        let principal = self
            .users
            .principal(claims.sub)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if !principal.status.is_active() {
            return Err(AuthError::AccountInactive(principal.status));
        }

        Ok(AuthContext {
            user_id: claims.sub,
            role: claims.role,
            expires_at: claims.expires_at(),
            jti: claims.jti,
        })
    }

    /// End one session: revoke the presented access token and the refresh
    /// token's family. Either credential may be absent.
    pub async fn logout(
        &self,
        access: Option<&AccessClaims>,
        refresh_raw: Option<&str>,
        client: &ClientContext,
    ) -> Result<(), AuthError> {
        if let Some(claims) = access {
            self.add_revoked_access_jti(
                &claims.jti,
                claims.sub,
                claims.expires_at(),
                reasons::LOGOUT,
            )
            .await?;
        }

        let mut family_id = None;
        let mut user_id = access.map(|c| c.sub);
        if let Some(raw) = refresh_raw {
            let record = self
                .tokens
                .find_refresh_token(&hash_refresh_token(raw))
                .await?;
            // A refresh cookie belonging to someone else is left alone.
            if let Some(record) = record.filter(|r| user_id.is_none_or(|u| u == r.user_id)) {
                self.tokens
                    .revoke_family(record.user_id, record.family_id, reasons::LOGOUT)
                    .await?;
                family_id = Some(record.family_id);
                user_id = Some(record.user_id);
            }
        }

        if let Some(user_id) = user_id {
            self.audit
                .event(
                    AuditAction::Logout,
                    Some(user_id),
                    Some(user_id),
                    client,
                    json!({ "familyId": family_id }),
                )
                .await;
        }
        Ok(())
    }

    /// Revoke the current access token and every session of the caller.
    pub async fn logout_everywhere(
        &self,
        ctx: &AuthContext,
        client: &ClientContext,
    ) -> Result<u64, AuthError> {
        self.add_revoked_access_jti(&ctx.jti, ctx.user_id, ctx.expires_at, reasons::LOGOUT_ALL)
            .await?;
        self.revoke_all_user_refresh_tokens(
            Some(ctx.user_id),
            ctx.user_id,
            reasons::LOGOUT_ALL,
            client,
        )
        .await
    }

    /// Active sessions of the user, most recently refreshed first.
    pub async fn list_active_sessions(&self, user_id: Uuid) -> Result<Vec<ActiveSession>, AuthError> {
        let mut tokens = self.tokens.list_active_tokens(user_id).await?;
        tokens.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));

        let mut seen = HashSet::new();
        Ok(tokens
            .into_iter()
            .filter(|t| seen.insert(t.family_id))
            .map(|t| ActiveSession {
                family_id: t.family_id,
                token_id: t.id,
                issued_at: t.issued_at,
                expires_at: t.expires_at,
                user_agent: t.user_agent,
                ip: t.ip,
            })
            .collect())
    }

    /// Change an account's status on behalf of `actor`.
    ///
    /// Leaving `Active` revokes every refresh token of the account; its access
    /// tokens stop working on their next use through the live status check.
    /// Returns the previous status, or `None` if the account does not exist.
    pub async fn change_status(
        &self,
        actor: &AuthContext,
        user_id: Uuid,
        status: AccountStatus,
        client: &ClientContext,
    ) -> Result<Option<AccountStatus>, AuthError> {
        let Some(target) = self.users.find_by_id(user_id).await? else {
            return Ok(None);
        };
        if !actor.role.at_least(target.role) {
            return Err(AuthError::InsufficientRole);
        }

        let Some(previous) = self.users.set_status(user_id, status).await? else {
            return Ok(None);
        };
        info!(actor = %actor.user_id, %user_id, from = %previous, to = %status, "account status changed");

        let mut revoked = 0;
        if previous.is_active() && !status.is_active() {
            revoked = self
                .revoke_all_user_refresh_tokens(
                    Some(actor.user_id),
                    user_id,
                    reasons::STATUS_CHANGE,
                    client,
                )
                .await?;
        }

        self.audit
            .event(
                AuditAction::StatusChange,
                Some(actor.user_id),
                Some(user_id),
                client,
                json!({ "from": previous, "to": status, "revoked": revoked }),
            )
            .await;
        Ok(Some(previous))
    }

    /// Delete revoked-jti rows past their expiry.
    pub async fn purge_expired_revocations(&self) -> Result<u64, AuthError> {
        let purged = self.tokens.purge_expired_revocations().await?;
        if purged > 0 {
            debug!(purged, "purged expired access-token revocations");
        }
        Ok(purged)
    }

    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, AuthError> {
        self.audit.recent(limit).await
    }
}
