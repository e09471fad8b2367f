//! Authentication and session management.
//!
//! Password verification, the access-token codec, refresh-token families,
//! the revoked-access registry and the audit trail, orchestrated by
//! [`session::SessionManager`]. Shared by every HTTP surface of Fixit.

pub mod audit;
pub mod jwt;
pub mod memory;
pub mod password;
pub mod queries;
pub mod session;
pub mod store;

use thiserror::Error;

use crate::models::auth::AccountStatus;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Missing, malformed, tampered, expired or revoked token. Deliberately
    /// carries no detail.
    #[error("Invalid token")]
    InvalidToken,

    /// A spent refresh token was presented again; its family has been revoked.
    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Account {0}")]
    AccountInactive(AccountStatus),

    #[error("Insufficient privileges")]
    InsufficientRole,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
