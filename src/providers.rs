//! External identity providers and their startup-time registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Authentication providers we know about. `Email` means no provider, just
/// email and password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Email,
    Google,
    Facebook,
}

impl Provider {
    pub fn as_i64(&self) -> i64 {
        match self {
            Provider::Email => 1,
            Provider::Google => 2,
            Provider::Facebook => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Provider::Email),
            2 => Some(Provider::Google),
            4 => Some(Provider::Facebook),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Email => "email",
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        };
        f.write_str(name)
    }
}

/// The identity a provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub email: String,
    pub external_id: String,
}

#[derive(Debug)]
pub enum ProviderTokenError {
    /// Signature, audience, issuer or expiry check failed
    Rejected(jsonwebtoken::errors::Error),
    /// The token is valid but lacks a usable verified email
    MissingEmail,
    /// The provider could not be reached
    Unavailable(String),
}

impl fmt::Display for ProviderTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderTokenError::Rejected(e) => write!(f, "Token rejected: {}", e),
            ProviderTokenError::MissingEmail => write!(f, "Token has no verified email"),
            ProviderTokenError::Unavailable(e) => write!(f, "Provider unavailable: {}", e),
        }
    }
}

impl std::error::Error for ProviderTokenError {}

/// Verifies a token issued by an external provider for our client id.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(
        &self,
        client_id: &str,
        token: &str,
    ) -> Result<ExternalIdentity, ProviderTokenError>;
}

#[derive(Clone)]
pub struct ProviderConfig {
    /// OAuth client id; must match the token audience
    pub client_id: String,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Provider id → configuration. Built at startup and shared by `Arc`.
///
/// Registering a provider twice overwrites the earlier config (last write
/// wins). Verifications already in flight keep the config they cloned.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<Provider, ProviderConfig>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Provider, config: ProviderConfig) {
        tracing::info!(provider = %provider, client_id = %config.client_id, "Registered provider");
        self.providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider, config);
    }

    pub fn get(&self, provider: Provider) -> Option<ProviderConfig> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&provider)
            .cloned()
    }

    /// Startup check: every listed provider has a config.
    /// Returns the first one that is missing.
    pub fn ensure_registered(&self, providers: &[Provider]) -> Result<(), Provider> {
        let map = self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match providers.iter().find(|p| !map.contains_key(p)) {
            Some(missing) => Err(*missing),
            None => Ok(()),
        }
    }
}

/// Claims we read from an OpenID-style ID token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
}

/// Verifies signed ID tokens locally (signature, audience, issuer, expiry).
pub struct IdTokenVerifier {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuers: Vec<String>,
}

impl IdTokenVerifier {
    /// Shared-secret (HS256) tokens.
    pub fn hmac(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            issuers: Vec::new(),
        }
    }

    /// RS256 tokens signed by the provider's published key.
    pub fn rsa_pem(pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self {
            decoding_key: DecodingKey::from_rsa_pem(pem)?,
            algorithm: Algorithm::RS256,
            issuers: Vec::new(),
        })
    }

    /// Only accept tokens whose `iss` is one of these.
    pub fn with_issuers(mut self, issuers: &[&str]) -> Self {
        self.issuers = issuers.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[async_trait]
impl TokenVerifier for IdTokenVerifier {
    async fn verify(
        &self,
        client_id: &str,
        token: &str,
    ) -> Result<ExternalIdentity, ProviderTokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 30;
        validation.set_audience(&[client_id]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        if !self.issuers.is_empty() {
            validation.set_issuer(&self.issuers);
        }

        let data = jsonwebtoken::decode::<IdTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(ProviderTokenError::Rejected)?;
        let claims = data.claims;

        if claims.email_verified == Some(false) {
            return Err(ProviderTokenError::MissingEmail);
        }
        let email = claims
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(ProviderTokenError::MissingEmail)?;

        Ok(ExternalIdentity {
            email,
            external_id: claims.sub,
        })
    }
}
