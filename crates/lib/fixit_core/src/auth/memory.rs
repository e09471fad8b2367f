//! In-process [`TokenStore`] and [`UserDirectory`].
//!
//! Each store keeps its state behind a single mutex, so every operation is
//! atomic with respect to every other. Used by tests and by embedders that
//! do not run PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::AuthError;
use super::store::{
    CreatedSession, RotationOutcome, TokenStore, UserDirectory, families_to_evict, reasons,
};
use crate::models::auth::{
    AccountStatus, AuditEntry, NewRefreshToken, NewUser, Principal, RefreshReplacement,
    RefreshTokenRecord, RevokedAccessJti, UserAccount, UserWithPassword,
};

#[derive(Default)]
struct TokenState {
    /// Refresh tokens keyed by id.
    tokens: HashMap<Uuid, RefreshTokenRecord>,
    /// token_hash -> id.
    by_hash: HashMap<String, Uuid>,
    revoked_jtis: HashMap<String, RevokedAccessJti>,
    audit: Vec<AuditEntry>,
    fail_audit: bool,
}

impl TokenState {
    fn insert(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, AuthError> {
        if self.by_hash.contains_key(&token.token_hash) {
            return Err(AuthError::Conflict("refresh token hash already exists".into()));
        }
        let record = token.into_record();
        self.by_hash.insert(record.token_hash.clone(), record.id);
        self.tokens.insert(record.id, record.clone());
        Ok(record)
    }

    fn revoke_where<P>(&mut self, reason: &str, mut pred: P) -> u64
    where
        P: FnMut(&RefreshTokenRecord) -> bool,
    {
        let now = Utc::now();
        let mut count = 0;
        for token in self.tokens.values_mut() {
            if token.revoked_at.is_none() && pred(token) {
                token.revoked_at = Some(now);
                token.revocation_reason = Some(reason.to_string());
                count += 1;
            }
        }
        count
    }

    fn live_by_hash(&self, token_hash: &str) -> Option<&RefreshTokenRecord> {
        let now = Utc::now();
        self.by_hash
            .get(token_hash)
            .and_then(|id| self.tokens.get(id))
            .filter(|t| t.expires_at > now)
    }
}

/// Token store held entirely in memory.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: Mutex<TokenState>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append_audit` fail.
    pub async fn fail_audit_appends(&self, fail: bool) {
        self.state.lock().await.fail_audit = fail;
    }

    /// All tokens of one family, oldest first.
    pub async fn family(&self, family_id: Uuid) -> Vec<RefreshTokenRecord> {
        let state = self.state.lock().await;
        let mut tokens: Vec<_> = state
            .tokens
            .values()
            .filter(|t| t.family_id == family_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.issued_at);
        tokens
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create_session(
        &self,
        token: NewRefreshToken,
        max_active: usize,
    ) -> Result<CreatedSession, AuthError> {
        let mut state = self.state.lock().await;
        if state.by_hash.contains_key(&token.token_hash) {
            return Err(AuthError::Conflict("refresh token hash already exists".into()));
        }
        let now = Utc::now();
        let active: Vec<RefreshTokenRecord> = state
            .tokens
            .values()
            .filter(|t| t.user_id == token.user_id && t.is_active(now))
            .cloned()
            .collect();
        let evicted_families = families_to_evict(&active, max_active);
        let user_id = token.user_id;
        state.revoke_where(reasons::MAX_SESSIONS_EXCEEDED, |t| {
            t.user_id == user_id && evicted_families.contains(&t.family_id)
        });
        let record = state.insert(token)?;
        Ok(CreatedSession {
            record,
            evicted_families,
        })
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let state = self.state.lock().await;
        Ok(state.live_by_hash(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement: RefreshReplacement,
    ) -> Result<RotationOutcome, AuthError> {
        let mut state = self.state.lock().await;
        let Some(previous) = state.live_by_hash(token_hash).cloned() else {
            return Ok(RotationOutcome::NotFound);
        };

        if previous.is_spent() {
            let family_id = previous.family_id;
            let revoked = state.revoke_where(reasons::REUSE_DETECTED, |t| t.family_id == family_id);
            return Ok(RotationOutcome::Reused {
                record: previous,
                revoked,
            });
        }

        let current = state.insert(replacement.for_predecessor(&previous))?;
        let now = Utc::now();
        let previous = match state.tokens.get_mut(&previous.id) {
            Some(old) => {
                old.revoked_at = Some(now);
                old.replaced_by_token_id = Some(current.id);
                old.revocation_reason = Some(reasons::ROTATED.to_string());
                old.clone()
            }
            None => return Err(AuthError::Internal("rotated token vanished".into())),
        };
        Ok(RotationOutcome::Rotated { previous, current })
    }

    async fn revoke_family(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        reason: &str,
    ) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        Ok(state.revoke_where(reason, |t| t.user_id == user_id && t.family_id == family_id))
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, reason: &str) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        Ok(state.revoke_where(reason, |t| t.user_id == user_id))
    }

    async fn list_active_tokens(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut tokens: Vec<_> = state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id && t.is_active(now))
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(tokens)
    }

    async fn revoke_access_jti(&self, entry: RevokedAccessJti) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        state.revoked_jtis.entry(entry.jti.clone()).or_insert(entry);
        Ok(())
    }

    async fn is_access_jti_revoked(&self, jti: &str) -> Result<bool, AuthError> {
        let state = self.state.lock().await;
        let now = Utc::now();
        Ok(state
            .revoked_jtis
            .get(jti)
            .is_some_and(|r| r.expires_at > now))
    }

    async fn purge_expired_revocations(&self) -> Result<u64, AuthError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let before = state.revoked_jtis.len();
        state.revoked_jtis.retain(|_, r| r.expires_at > now);
        Ok((before - state.revoked_jtis.len()) as u64)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        if state.fail_audit {
            return Err(AuthError::Internal("audit sink unavailable".into()));
        }
        state.audit.push(entry.clone());
        Ok(())
    }

    async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>, AuthError> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }
}

struct StoredUser {
    account: UserAccount,
    password_hash: Option<String>,
}

/// User directory held entirely in memory.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<Uuid, StoredUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn principal(&self, user_id: Uuid) -> Result<Option<Principal>, AuthError> {
        let users = self.users.lock().await;
        Ok(users.get(&user_id).map(|u| u.account.principal()))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserAccount>, AuthError> {
        let users = self.users.lock().await;
        Ok(users.get(&user_id).map(|u| u.account.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.account.email.eq_ignore_ascii_case(email.trim()))
            .map(|u| UserWithPassword {
                user: u.account.clone(),
                password_hash: u.password_hash.clone(),
            }))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserAccount, AuthError> {
        let mut users = self.users.lock().await;
        let email = user.email.trim().to_string();
        if users
            .values()
            .any(|u| u.account.email.eq_ignore_ascii_case(&email))
        {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        let account = UserAccount {
            id: Uuid::new_v4(),
            email,
            name: user.name,
            role: user.role,
            status: user.status,
            created_at: Utc::now(),
        };
        users.insert(
            account.id,
            StoredUser {
                account: account.clone(),
                password_hash: Some(user.password_hash),
            },
        );
        Ok(account)
    }

    async fn set_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<AccountStatus>, AuthError> {
        let mut users = self.users.lock().await;
        Ok(users.get_mut(&user_id).map(|u| {
            let previous = u.account.status;
            u.account.status = status;
            previous
        }))
    }
}
