//! Signed session credentials.
//!
//! A token is `hex(claims_json) "." hex(hmac_sha256(key, claims_json))`.
//! Claims carry the user id and an absolute expiry in Unix seconds. Tokens
//! are verified with a constant-time MAC comparison before the claims are
//! parsed, so tampered payloads never reach the JSON decoder.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::config::SESSION_KEY_LENGTH;
use crate::transaction::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Reasons a credential is rejected. All of them mean "unauthenticated" to
/// the caller; the distinction is kept for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("malformed session token")]
    Malformed,

    #[error("session token signature mismatch")]
    BadSignature,

    #[error("session expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("invalid session key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: UserId,
    exp: i64,
}

/// A verified caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is still valid at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// HMAC key used to sign and verify session tokens.
#[derive(Clone)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SESSION_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parses a hex-encoded key, as written by `wardrobe-server init`.
    pub fn from_hex(encoded: &str) -> Result<Self, IdentityError> {
        let bytes =
            hex::decode(encoded.trim()).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        if bytes.len() < SESSION_KEY_LENGTH {
            return Err(IdentityError::InvalidKey(format!(
                "expected at least {SESSION_KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Issues and verifies session tokens.
#[derive(Debug, Clone)]
pub struct SessionVerifier {
    key: SessionKey,
}

impl SessionVerifier {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.key.0).expect("hmac accepts any key length")
    }

    /// Issues a token for `user_id` valid for `ttl` from `now`.
    ///
    /// Lifetimes reaching past the representable calendar are clamped to
    /// its last instant.
    pub fn issue_at(&self, user_id: UserId, ttl: Duration, now: DateTime<Utc>) -> String {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let claims = Claims {
            sub: user_id,
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let mut mac = self.mac();
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();
        format!("{}.{}", hex::encode(&payload), hex::encode(tag))
    }

    /// Issues a token for `user_id` valid for `ttl` from now.
    pub fn issue(&self, user_id: UserId, ttl: Duration) -> String {
        self.issue_at(user_id, ttl, Utc::now())
    }

    /// Verifies `token` against the clock value `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Session, IdentityError> {
        let (payload_hex, tag_hex) = token.trim().split_once('.').ok_or(IdentityError::Malformed)?;
        let payload = hex::decode(payload_hex).map_err(|_| IdentityError::Malformed)?;
        let tag = hex::decode(tag_hex).map_err(|_| IdentityError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&tag)
            .map_err(|_| IdentityError::BadSignature)?;

        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| IdentityError::Malformed)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(IdentityError::Malformed)?;

        let session = Session {
            user_id: claims.sub,
            expires_at,
        };
        if !session.is_live_at(now) {
            return Err(IdentityError::Expired(expires_at));
        }
        Ok(session)
    }

    /// Verifies `token` against the current time.
    pub fn verify(&self, token: &str) -> Result<Session, IdentityError> {
        self.verify_at(token, Utc::now())
    }
}
