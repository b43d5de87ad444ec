//! Signing key material and the key ring that tracks rotation.

use super::jwks::{Jwk, Jwks};
use jsonwebtoken::{DecodingKey, EncodingKey};
use log::info;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no signing key configured")]
    NoSigningKey,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// The public half of a key, usable only for verification
pub struct VerificationKey {
    kid: String,
    decoding: DecodingKey,
    jwk: Jwk,
}

impl VerificationKey {
    fn from_public_key(kid: String, public: &RsaPublicKey) -> Result<Self, KeyError> {
        let jwk = Jwk::from_rsa_public_key(public, kid.clone());
        let decoding = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { kid, decoding, jwk })
    }

    /// Accepts a public key (SPKI or PKCS#1) or a private key, in which case
    /// only its public half is kept.
    pub fn from_pem(kid: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        let kid = kid.into();
        let public = match decode_private_key(pem) {
            Ok(private) => private.to_public_key(),
            Err(_) => RsaPublicKey::from_public_key_pem(pem)
                .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
                .map_err(|e| KeyError::InvalidKey(format!("{kid}: {e}")))?,
        };
        Self::from_public_key(kid, &public)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }
}

/// An RSA private key with its key id
pub struct SigningKey {
    encoding: EncodingKey,
    public: Arc<VerificationKey>,
}

impl SigningKey {
    /// Load a PKCS#8 or PKCS#1 PEM private key
    pub fn from_pem(kid: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        let private = decode_private_key(pem)?;
        Self::from_private_key(kid.into(), &private)
    }

    /// Generate a fresh RSA-2048 key
    pub fn generate(kid: impl Into<String>) -> Result<Self, KeyError> {
        let private =
            RsaPrivateKey::new(&mut OsRng, 2048).map_err(|e| KeyError::Generation(e.to_string()))?;
        Self::from_private_key(kid.into(), &private)
    }

    fn from_private_key(kid: String, private: &RsaPrivateKey) -> Result<Self, KeyError> {
        let der = private
            .to_pkcs1_der()
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let encoding = EncodingKey::from_rsa_der(der.as_bytes());
        let public = VerificationKey::from_public_key(kid, &private.to_public_key())?;
        Ok(Self {
            encoding,
            public: Arc::new(public),
        })
    }

    pub fn kid(&self) -> &str {
        self.public.kid()
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn verification_key(&self) -> Arc<VerificationKey> {
        Arc::clone(&self.public)
    }
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| KeyError::InvalidKey(e.to_string()))
}

/// Key-store collaborator: the current signing key plus every historical key
/// still valid for verification.
pub trait KeyStore: Send + Sync {
    fn signing_key(&self) -> Result<Arc<SigningKey>, KeyError>;
    fn verification_key(&self, kid: &str, now: i64) -> Option<Arc<VerificationKey>>;
    fn jwks(&self, now: i64) -> Jwks;
    /// Note that a token expiring at `expires_at` was signed with `kid`, so
    /// the key outlives it after a rotation
    fn record_signed(&self, _kid: &str, _expires_at: i64) {}
    /// Drop retired keys whose tokens have all expired
    fn prune(&self, _now: i64) -> usize {
        0
    }
}

struct RetiredKey {
    key: Arc<VerificationKey>,
    /// Unix time after which no token signed with this key can still be valid
    retire_after: i64,
}

#[derive(Default)]
struct Ring {
    active: Option<Arc<SigningKey>>,
    /// Latest expiry of any token signed with the active key
    active_signed_until: i64,
    retired: Vec<RetiredKey>,
}

/// In-memory [`KeyStore`] supporting rotation without downtime
#[derive(Default)]
pub struct KeyRing {
    ring: RwLock<Ring>,
}

impl KeyRing {
    pub fn new(active: SigningKey) -> Self {
        Self {
            ring: RwLock::new(Ring {
                active: Some(Arc::new(active)),
                active_signed_until: 0,
                retired: Vec::new(),
            }),
        }
    }

    /// Make `key` the signing key. The previous signing key keeps verifying
    /// tokens until `retire_after`, or until the last token it signed
    /// expires if that is later. Returns the retirement time applied.
    pub fn rotate(&self, key: SigningKey, retire_after: i64) -> i64 {
        let mut ring = self.ring.write();
        let new_kid = key.kid().to_string();
        let retire_after = retire_after.max(ring.active_signed_until);
        ring.active_signed_until = 0;
        if let Some(previous) = ring.active.replace(Arc::new(key)) {
            info!(
                "Rotated signing key '{}' -> '{}', previous key retires at {}",
                previous.kid(),
                new_kid,
                retire_after
            );
            ring.retired.push(RetiredKey {
                key: previous.verification_key(),
                retire_after,
            });
        }
        retire_after
    }

    /// Register a verification-only key, e.g. one loaded from configuration
    /// after a restart.
    pub fn add_verification_key(&self, key: VerificationKey, retire_after: i64) {
        self.ring.write().retired.push(RetiredKey {
            key: Arc::new(key),
            retire_after,
        });
    }
}

impl KeyStore for KeyRing {
    fn signing_key(&self) -> Result<Arc<SigningKey>, KeyError> {
        self.ring.read().active.clone().ok_or(KeyError::NoSigningKey)
    }

    fn verification_key(&self, kid: &str, now: i64) -> Option<Arc<VerificationKey>> {
        let ring = self.ring.read();
        if let Some(active) = ring.active.as_ref().filter(|k| k.kid() == kid) {
            return Some(active.verification_key());
        }
        ring.retired
            .iter()
            .find(|k| k.key.kid() == kid && now < k.retire_after)
            .map(|k| Arc::clone(&k.key))
    }

    fn record_signed(&self, kid: &str, expires_at: i64) {
        let mut ring = self.ring.write();
        if ring.active.as_ref().is_some_and(|k| k.kid() == kid) {
            ring.active_signed_until = ring.active_signed_until.max(expires_at);
        } else if let Some(retired) = ring.retired.iter_mut().find(|k| k.key.kid() == kid) {
            // Signed just before a rotation took the key out of service
            retired.retire_after = retired.retire_after.max(expires_at);
        }
    }

    fn jwks(&self, now: i64) -> Jwks {
        let ring = self.ring.read();
        let active = ring.active.iter().map(|k| k.public.jwk().clone());
        let retired = ring
            .retired
            .iter()
            .filter(|k| now < k.retire_after)
            .map(|k| k.key.jwk().clone());
        Jwks {
            keys: active.chain(retired).collect(),
        }
    }

    fn prune(&self, now: i64) -> usize {
        let mut ring = self.ring.write();
        let before = ring.retired.len();
        ring.retired.retain(|k| now < k.retire_after);
        before - ring.retired.len()
    }
}
