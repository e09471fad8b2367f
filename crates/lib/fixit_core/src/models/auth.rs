//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! types in `fixit_api::models` (which carry `#[serde(rename)]` for camelCase).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role, ordered from lowest to highest privilege.
///
/// The declaration order is the privilege order; `rank()` makes it explicit
/// so hierarchy checks never depend on string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tenant,
    Contractor,
    Landlord,
    Staff,
    Admin,
}

impl Role {
    /// Every role, lowest privilege first.
    pub const ALL: [Role; 5] = [
        Role::Tenant,
        Role::Contractor,
        Role::Landlord,
        Role::Staff,
        Role::Admin,
    ];

    /// Position in the privilege hierarchy (1 = lowest).
    pub fn rank(self) -> u8 {
        match self {
            Role::Tenant => 1,
            Role::Contractor => 2,
            Role::Landlord => 3,
            Role::Staff => 4,
            Role::Admin => 5,
        }
    }

    /// Whether this role is at least as privileged as `required`.
    pub fn at_least(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tenant => "tenant",
            Role::Contractor => "contractor",
            Role::Landlord => "landlord",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// Account lifecycle status. Only `Active` accounts may authenticate or act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    Rejected,
}

impl AccountStatus {
    pub fn is_active(self) -> bool {
        self == AccountStatus::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "suspended" => Ok(AccountStatus::Suspended),
            "rejected" => Ok(AccountStatus::Rejected),
            other => Err(format!("unknown account status '{other}'")),
        }
    }
}

/// The live `{id, role, status}` view of an account that the core reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub status: AccountStatus,
}

/// Domain user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            role: self.role,
            status: self.status,
        }
    }
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: UserAccount,
    pub password_hash: Option<String>,
}

/// Fields required to create an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Unique token id, used for targeted revocation.
    pub jti: String,
    /// Subject: the user id (standard JWT `sub` claim).
    pub sub: Uuid,
    /// Role snapshot at issuance.
    pub role: Role,
    /// Token type discriminator; always `"access"`.
    pub typ: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl AccessClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Refresh token record stored in the database. The raw secret is never kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<Uuid>,
    pub revocation_reason: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl RefreshTokenRecord {
    /// A token that was revoked or already rotated away must never be
    /// presented again; doing so is treated as theft.
    pub fn is_spent(&self) -> bool {
        self.revoked_at.is_some() || self.replaced_by_token_id.is_some()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_spent() && self.expires_at > now
    }
}

/// A refresh token about to be inserted.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl NewRefreshToken {
    pub fn into_record(self) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: self.id,
            user_id: self.user_id,
            token_hash: self.token_hash,
            family_id: self.family_id,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            revoked_at: None,
            replaced_by_token_id: None,
            revocation_reason: None,
            user_agent: self.user_agent,
            ip: self.ip,
        }
    }
}

/// The successor of a rotated refresh token. User and family are taken from
/// the locked predecessor row, never from the caller.
#[derive(Debug, Clone)]
pub struct RefreshReplacement {
    pub id: Uuid,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl RefreshReplacement {
    pub fn for_predecessor(self, predecessor: &RefreshTokenRecord) -> NewRefreshToken {
        NewRefreshToken {
            id: self.id,
            user_id: predecessor.user_id,
            token_hash: self.token_hash,
            family_id: predecessor.family_id,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            user_agent: self.user_agent,
            ip: self.ip,
        }
    }
}

/// Registry row that makes an unexpired access token unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedAccessJti {
    pub jti: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
}

/// Security-relevant actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Login,
    Register,
    Logout,
    TokenRotated,
    RefreshReuse,
    StatusChange,
    TokenFamilyRevoked,
    AllTokensRevoked,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::Register => "register",
            AuditAction::Logout => "logout",
            AuditAction::TokenRotated => "token-rotated",
            AuditAction::RefreshReuse => "refresh-reuse",
            AuditAction::StatusChange => "status-change",
            AuditAction::TokenFamilyRevoked => "token-family-revoked",
            AuditAction::AllTokensRevoked => "all-tokens-revoked",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AuditAction::Login,
            AuditAction::Register,
            AuditAction::Logout,
            AuditAction::TokenRotated,
            AuditAction::RefreshReuse,
            AuditAction::StatusChange,
            AuditAction::TokenFamilyRevoked,
            AuditAction::AllTokensRevoked,
        ]
        .into_iter()
        .find(|a| a.as_str() == s)
        .ok_or_else(|| format!("unknown audit action '{s}'"))
    }
}

/// Append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_user_id: Option<Uuid>,
    pub target_user_id: Option<Uuid>,
    pub action: AuditAction,
    pub metadata: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a request came from; copied onto refresh tokens and audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_roles_satisfy_lower_requirements() {
        for (i, higher) in Role::ALL.iter().enumerate() {
            for lower in &Role::ALL[..=i] {
                assert!(
                    higher.at_least(*lower),
                    "{higher} should satisfy {lower}"
                );
            }
            for above in &Role::ALL[i + 1..] {
                assert!(!higher.at_least(*above), "{higher} must not satisfy {above}");
            }
        }
    }

    #[test]
    fn landlord_is_below_staff() {
        assert!(Role::Landlord.rank() < Role::Staff.rank());
        assert!(!Role::Landlord.at_least(Role::Staff));
        assert!(Role::Admin.at_least(Role::Staff));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Landlord).unwrap(), "\"landlord\"");
        let r: Role = serde_json::from_str("\"staff\"").unwrap();
        assert_eq!(r, Role::Staff);
        assert!(serde_json::from_str::<Role>("\"superuser\"").is_err());
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Contractor".parse::<Role>().unwrap(), Role::Contractor);
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            AccountStatus::Active,
            AccountStatus::Inactive,
            AccountStatus::Suspended,
            AccountStatus::Rejected,
        ] {
            assert_eq!(s.as_str().parse::<AccountStatus>().unwrap(), s);
        }
        assert!(AccountStatus::Active.is_active());
        assert!(!AccountStatus::Suspended.is_active());
    }

    #[test]
    fn audit_action_uses_kebab_case() {
        assert_eq!(AuditAction::RefreshReuse.as_str(), "refresh-reuse");
        assert_eq!(
            serde_json::to_string(&AuditAction::AllTokensRevoked).unwrap(),
            "\"all-tokens-revoked\""
        );
        assert_eq!(
            "token-family-revoked".parse::<AuditAction>().unwrap(),
            AuditAction::TokenFamilyRevoked
        );
    }

    #[test]
    fn spent_tokens_are_not_active() {
        let now = Utc::now();
        let mut record = NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".into(),
            family_id: Uuid::new_v4(),
            issued_at: now,
            expires_at: now + chrono::Duration::days(1),
            user_agent: None,
            ip: None,
        }
        .into_record();
        assert!(record.is_active(now));

        record.replaced_by_token_id = Some(Uuid::new_v4());
        assert!(record.is_spent());
        assert!(!record.is_active(now));
    }
}
