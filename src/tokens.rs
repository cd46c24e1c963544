//! Opaque session token generation.
//!
//! Tokens are 32 random bytes, base64url encoded. Only their SHA-256 digests are
//! stored, so a leaked database cannot be replayed as sessions.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

const TOKEN_BYTES: usize = 32;

/// Generate an unguessable opaque token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a token for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Tokens handed to the client for one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub auth_token: String,
    /// Unix seconds; slides forward on every verified request
    pub auth_token_expiry: i64,
    /// Only present right after sign-in or refresh
    pub refresh_token: Option<String>,
    /// Unix seconds; fixed at issuance
    pub refresh_token_expiry: i64,
}

/// A freshly minted token pair together with the digests to persist.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub tokens: SessionTokens,
    pub auth_hash: String,
    pub refresh_hash: String,
}

impl IssuedTokens {
    pub fn mint(config: &AuthConfig, now: i64) -> Self {
        let auth_token = generate_token();
        let refresh_token = generate_token();

        Self {
            auth_hash: hash_token(&auth_token),
            refresh_hash: hash_token(&refresh_token),
            tokens: SessionTokens {
                auth_token,
                auth_token_expiry: now + config.auth_token_idle_secs(),
                refresh_token: Some(refresh_token),
                refresh_token_expiry: now + config.refresh_token_age_secs(),
            },
        }
    }
}
