//! Session-core configuration.
//!
//! Read once at startup and injected into the token codec and the session
//! manager; nothing in the core reads the environment after that.

use std::path::{Path, PathBuf};

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;
use tracing::{info, warn};

/// Default access-token lifetime.
pub const DEFAULT_ACCESS_TOKEN_TTL: &str = "20m";

/// Default refresh-token lifetime.
pub const DEFAULT_REFRESH_TOKEN_TTL: &str = "14d";

/// Default cap on simultaneously active sessions (token families) per user.
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 5;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid duration '{0}': expected a number followed by ms, s, m, h or d")]
    InvalidDuration(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Token lifetimes, session cap, hashing cost and the signing secret.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// JWT signing secret (HS256).
    pub jwt_secret: String,
    /// Access-token lifetime in milliseconds.
    pub access_token_ttl_ms: i64,
    /// Refresh-token lifetime in milliseconds.
    pub refresh_token_ttl_ms: i64,
    /// Maximum simultaneously active token families per user.
    pub max_sessions_per_user: usize,
    /// bcrypt work factor.
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    /// Defaults with an explicit secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl_ms: 20 * 60 * 1000,
            refresh_token_ttl_ms: 14 * 24 * 60 * 60 * 1000,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                | Default                        |
    /// |-------------------------|--------------------------------|
    /// | `JWT_SECRET`            | generated & persisted to file  |
    /// | `ACCESS_TOKEN_TTL`      | `20m`                          |
    /// | `REFRESH_TOKEN_TTL`     | `14d`                          |
    /// | `MAX_SESSIONS_PER_USER` | `5`                            |
    /// | `BCRYPT_COST`           | `10`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = resolve_jwt_secret();
        Self::from_lookup(secret, |key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(jwt_secret: String, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let access_token_ttl_ms = parse_duration_ms(&read("ACCESS_TOKEN_TTL", DEFAULT_ACCESS_TOKEN_TTL))?;
        let refresh_token_ttl_ms =
            parse_duration_ms(&read("REFRESH_TOKEN_TTL", DEFAULT_REFRESH_TOKEN_TTL))?;
        if refresh_token_ttl_ms <= access_token_ttl_ms {
            return Err(ConfigError::InvalidValue {
                key: "REFRESH_TOKEN_TTL".into(),
                message: "must be longer than ACCESS_TOKEN_TTL".into(),
            });
        }

        let max_sessions_per_user = parse_number::<usize>(
            "MAX_SESSIONS_PER_USER",
            &read("MAX_SESSIONS_PER_USER", &DEFAULT_MAX_SESSIONS_PER_USER.to_string()),
        )?;
        if max_sessions_per_user == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_SESSIONS_PER_USER".into(),
                message: "must be at least 1".into(),
            });
        }

        let bcrypt_cost =
            parse_number::<u32>("BCRYPT_COST", &read("BCRYPT_COST", &DEFAULT_BCRYPT_COST.to_string()))?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                key: "BCRYPT_COST".into(),
                message: "must be between 4 and 31".into(),
            });
        }

        Ok(Self {
            jwt_secret,
            access_token_ttl_ms,
            refresh_token_ttl_ms,
            max_sessions_per_user,
            bcrypt_cost,
        })
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.access_token_ttl_ms)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.refresh_token_ttl_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a valid number"),
    })
}

/// Parse a duration string such as `"20m"` or `"14d"` into milliseconds.
///
/// Accepted units: `ms`, `s`, `m`, `h`, `d`. A bare number is milliseconds.
pub fn parse_duration_ms(raw: &str) -> Result<i64, ConfigError> {
    let s = raw.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }
    let value: i64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;
    let factor: i64 = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(ConfigError::InvalidDuration(raw.to_string())),
    };
    let ms = value
        .checked_mul(factor)
        .ok_or_else(|| ConfigError::InvalidDuration(raw.to_string()))?;
    if ms <= 0 {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }
    Ok(ms)
}

/// Resolve the JWT secret: `JWT_SECRET` if set, otherwise the secret
/// persisted in the data directory, generated on first use.
pub fn resolve_jwt_secret() -> String {
    match std::env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => secret,
        _ => load_or_create_secret(&jwt_secret_path()),
    }
}

/// Read the secret stored at `path`, or generate one and try to store it.
///
/// A secret that cannot be stored is still returned, but it will not survive
/// a restart, so every issued token dies with the process.
fn load_or_create_secret(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    let persisted = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, &secret));
    match persisted {
        Ok(()) => info!(path = %path.display(), "generated new JWT secret"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "could not persist generated JWT secret; sessions will not survive a restart, set JWT_SECRET"
        ),
    }
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fixit")
        .join("jwt-secret")
}
