//! API server configuration.

use axum_extra::extract::cookie::SameSite;
use fixit_core::config::{AuthConfig, ConfigError};
use fixit_core::db::DEFAULT_DATABASE_URL;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3100";

/// Attributes shared by the auth cookies.
#[derive(Clone, Debug)]
pub struct CookieConfig {
    /// Set the `Secure` attribute.
    pub secure: bool,
    /// `Domain` attribute; host-only when unset.
    pub domain: Option<String>,
    pub access_same_site: SameSite,
    pub refresh_same_site: SameSite,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: false,
            domain: None,
            access_same_site: SameSite::Lax,
            refresh_same_site: SameSite::Strict,
        }
    }
}

impl CookieConfig {
    /// Builds the cookie configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secure = match lookup("COOKIE_SECURE") {
            Some(v) => parse_bool("COOKIE_SECURE", &v)?,
            None => defaults.secure,
        };
        let domain = lookup("COOKIE_DOMAIN").filter(|d| !d.trim().is_empty());
        let access_same_site = match lookup("ACCESS_COOKIE_SAMESITE") {
            Some(v) => parse_same_site("ACCESS_COOKIE_SAMESITE", &v)?,
            None => defaults.access_same_site,
        };
        let refresh_same_site = match lookup("REFRESH_COOKIE_SAMESITE") {
            Some(v) => parse_same_site("REFRESH_COOKIE_SAMESITE", &v)?,
            None => defaults.refresh_same_site,
        };
        if (access_same_site == SameSite::None || refresh_same_site == SameSite::None) && !secure {
            return Err(ConfigError::InvalidValue {
                key: "COOKIE_SECURE".into(),
                message: "SameSite=None cookies require COOKIE_SECURE=true".into(),
            });
        }
        Ok(Self {
            secure,
            domain,
            access_same_site,
            refresh_same_site,
        })
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    pub auth: AuthConfig,
    pub cookies: CookieConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                  | Default                            |
    /// |---------------------------|------------------------------------|
    /// | `BIND_ADDR`               | `127.0.0.1:3100`                   |
    /// | `DATABASE_URL`            | `postgres://localhost:5432/fixit`  |
    /// | `COOKIE_SECURE`           | `false`                            |
    /// | `COOKIE_DOMAIN`           | unset                              |
    /// | `ACCESS_COOKIE_SAMESITE`  | `lax`                              |
    /// | `REFRESH_COOKIE_SAMESITE` | `strict`                           |
    ///
    /// Token and hashing settings are read by [`AuthConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth = AuthConfig::from_env()?;
        Self::from_lookup(auth, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(auth: AuthConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            pg_connection_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            cookies: CookieConfig::from_lookup(&lookup)?,
            auth,
        })
    }

    /// Configuration for tests and embedders: defaults with an explicit secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            pg_connection_url: DEFAULT_DATABASE_URL.into(),
            auth: AuthConfig::new(secret),
            cookies: CookieConfig::default(),
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}

fn parse_same_site(key: &str, raw: &str) -> Result<SameSite, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' must be one of lax, strict, none"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn refresh_cookie_is_stricter_by_default() {
        let cfg = CookieConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.access_same_site, SameSite::Lax);
        assert_eq!(cfg.refresh_same_site, SameSite::Strict);
        assert!(!cfg.secure);
        assert!(cfg.domain.is_none());
    }

    #[test]
    fn cookie_overrides_are_read() {
        let cfg = CookieConfig::from_lookup(lookup_from(&[
            ("COOKIE_SECURE", "true"),
            ("COOKIE_DOMAIN", "fixit.example"),
            ("ACCESS_COOKIE_SAMESITE", "strict"),
        ]))
        .unwrap();
        assert!(cfg.secure);
        assert_eq!(cfg.domain.as_deref(), Some("fixit.example"));
        assert_eq!(cfg.access_same_site, SameSite::Strict);
    }

    #[test]
    fn same_site_none_requires_secure() {
        assert!(
            CookieConfig::from_lookup(lookup_from(&[("ACCESS_COOKIE_SAMESITE", "none")])).is_err()
        );
        assert!(CookieConfig::from_lookup(lookup_from(&[("COOKIE_SECURE", "maybe")])).is_err());
    }

    #[test]
    fn api_defaults() {
        let cfg = ApiConfig::from_lookup(AuthConfig::new("s"), lookup_from(&[])).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(cfg.pg_connection_url, DEFAULT_DATABASE_URL);
    }
}
