//! Token minting.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::API_AUDIENCE;
use crate::error::TokenError;

/// JWT claims sent to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    pub aud: String,
}

/// A signed bearer token and the facts it was minted from.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub issuer_id: String,
    pub key_id: String,
    /// Unix seconds at mint time.
    pub issued_at: u64,
    /// Unix seconds after which the API rejects the token.
    pub expires_at: u64,
    token: String,
}

impl Credential {
    /// The compact JWT for the `Authorization: Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Lifetime left at `now` (unix seconds), zero once expired.
    pub fn remaining(&self, now: u64) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(now))
    }

    /// Whether the token should be re-minted before use at `now`.
    pub fn needs_renewal(&self, now: u64, margin: Duration) -> bool {
        self.remaining(now) <= margin
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("issuer_id", &self.issuer_id)
            .field("key_id", &self.key_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Mints ES256 tokens for one issuer/key pair.
///
/// The PEM is parsed once at construction, so a malformed key fails
/// early instead of on the first request.
#[derive(Clone)]
pub struct TokenIssuer {
    issuer_id: String,
    key_id: String,
    key: EncodingKey,
    lifetime: Duration,
}

impl TokenIssuer {
    /// Creates an issuer from a PKCS#8 EC private key in PEM form.
    pub fn new(
        issuer_id: impl Into<String>,
        key_id: impl Into<String>,
        private_key_pem: &[u8],
        lifetime: Duration,
    ) -> Result<Self, TokenError> {
        let key = EncodingKey::from_ec_pem(private_key_pem).map_err(TokenError::InvalidKey)?;
        Ok(Self {
            issuer_id: issuer_id.into(),
            key_id: key_id.into(),
            key,
            lifetime,
        })
    }

    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Mints a credential valid from now for the configured lifetime.
    pub fn mint(&self) -> Result<Credential, TokenError> {
        self.mint_at(unix_now()?)
    }

    /// Mints a credential as if the clock read `now` (unix seconds).
    pub fn mint_at(&self, now: u64) -> Result<Credential, TokenError> {
        let exp = now
            .checked_add(self.lifetime.as_secs())
            .ok_or(TokenError::LifetimeOverflow(self.lifetime))?;
        let claims = Claims {
            iss: self.issuer_id.clone(),
            iat: now,
            exp,
            aud: API_AUDIENCE.to_string(),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        header.typ = Some("JWT".into());

        let token = jsonwebtoken::encode(&header, &claims, &self.key).map_err(TokenError::Signing)?;
        debug!(kid = %self.key_id, exp = claims.exp, "minted bearer token");

        Ok(Credential {
            issuer_id: claims.iss,
            key_id: self.key_id.clone(),
            issued_at: now,
            expires_at: claims.exp,
            token,
        })
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer_id", &self.issuer_id)
            .field("key_id", &self.key_id)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// One-shot form of [`TokenIssuer::mint`].
pub fn mint(
    issuer_id: &str,
    key_id: &str,
    private_key_pem: &[u8],
    lifetime: Duration,
) -> Result<Credential, TokenError> {
    TokenIssuer::new(issuer_id, key_id, private_key_pem, lifetime)?.mint()
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::Clock)
}
