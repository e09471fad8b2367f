//! # fixit_core
//!
//! Session and authorization core for Fixit: credential verification,
//! access/refresh token handling, revocation and the audit trail.

pub mod auth;
pub mod config;
pub mod db;
pub mod migrate;
pub mod models;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
