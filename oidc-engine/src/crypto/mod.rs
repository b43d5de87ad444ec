//! Token signing, verification and opaque credential generation.

mod jwks;
mod keys;

pub use jwks::{Jwk, Jwks};
pub use keys::{KeyError, KeyRing, KeyStore, SigningKey, VerificationKey};

use crate::clock::Clock;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
pub(crate) use keys::tests as key_fixtures;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signed with an unknown or retired key")]
    UnknownKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong audience")]
    InvalidAudience,
    #[error("wrong issuer")]
    InvalidIssuer,
}

/// Claims carrying an expiry, checked against the engine [`Clock`]
pub trait ExpiringClaims {
    fn expires_at(&self) -> i64;
}

/// Signs and verifies compact RS256 JWTs with keys from a [`KeyStore`]
#[derive(Clone)]
pub struct TokenSigner {
    keys: Arc<dyn KeyStore>,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl TokenSigner {
    pub fn new(keys: Arc<dyn KeyStore>, issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            clock,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.keys
    }

    /// Sign `claims` with the current signing key, stamping its `kid`.
    ///
    /// The key store learns the token's expiry so that a later rotation keeps
    /// the key published for as long as the token is valid.
    pub fn sign<C>(&self, claims: &C) -> Result<String, KeyError>
    where
        C: Serialize + ExpiringClaims,
    {
        let key = self.keys.signing_key()?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid().to_string());
        let token = encode(&header, claims, key.encoding_key())
            .map_err(|e| KeyError::Signing(e.to_string()))?;
        self.keys.record_signed(key.kid(), claims.expires_at());
        Ok(token)
    }

    /// Verify signature, issuer, audience (when given) and expiry.
    ///
    /// Expiry is evaluated against the injected clock, not the system time.
    pub fn verify<C>(&self, token: &str, audience: Option<&str>) -> Result<C, VerifyError>
    where
        C: DeserializeOwned + ExpiringClaims,
    {
        let now = self.clock.now();
        let header = decode_header(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::InvalidSignature);
        }
        let kid = header.kid.ok_or(VerifyError::UnknownKey)?;
        let key = self
            .keys
            .verification_key(&kid, now)
            .ok_or(VerifyError::UnknownKey)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<C>(token, key.decoding_key(), &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => VerifyError::InvalidSignature,
            ErrorKind::InvalidAudience => VerifyError::InvalidAudience,
            ErrorKind::InvalidIssuer => VerifyError::InvalidIssuer,
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            _ => VerifyError::Malformed(e.to_string()),
        })?;

        if now >= data.claims.expires_at() {
            return Err(VerifyError::Expired);
        }
        Ok(data.claims)
    }
}

/// 256 bits from the OS RNG, base64url without padding
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256, used to key opaque credentials and client secrets in storage
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
