//! Access-token signing/verification and refresh-secret generation.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::models::auth::{AccessClaims, Principal};
use crate::uuid::new_jti;

/// Value of the `typ` claim on access tokens.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Length of a raw refresh secret.
const REFRESH_SECRET_LEN: usize = 64;

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// A refresh secret: `raw` goes to the client once, only `hash` is stored.
#[derive(Debug, Clone)]
pub struct RefreshSecret {
    pub raw: String,
    pub hash: String,
}

/// Signs and verifies HS256 access tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], access_ttl_ms: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: Duration::milliseconds(access_ttl_ms),
        }
    }

    /// Sign an access token for `principal` with a fresh jti.
    pub fn sign_access(&self, principal: &Principal) -> Result<SignedAccessToken, AuthError> {
        self.sign_access_at(principal, Utc::now())
    }

    fn sign_access_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<SignedAccessToken, AuthError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            jti: new_jti(),
            sub: principal.id,
            role: principal.role,
            typ: ACCESS_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(SignedAccessToken {
            token,
            expires_at: claims.expires_at(),
            jti: claims.jti,
        })
    }

    /// Verify signature, expiry and token type. Every failure is the same
    /// opaque [`AuthError::InvalidToken`].
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<AccessClaims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;
        if claims.typ != ACCESS_TOKEN_TYPE {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

/// Generate a high-entropy refresh secret and its storage hash.
pub fn make_refresh_secret() -> RefreshSecret {
    let raw: String = rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_SECRET_LEN)
        .map(char::from)
        .collect();
    let hash = hash_refresh_token(&raw);
    RefreshSecret { raw, hash }
}

/// SHA-256 hash a refresh token for storage and lookup.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
