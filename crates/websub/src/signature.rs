//! HMAC-SHA256 signing and verification.
//!
//! One primitive serves two purposes:
//! - deriving the per-topic secret handed to the hub, keyed by the master
//!   secret over the topic name;
//! - checking notification bodies, keyed by that per-topic secret over the
//!   raw payload.
//!
//! There is no timestamp or nonce in the scheme, so a valid signature proves
//! integrity and origin but does not protect against replay.

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// The only signature scheme notifications are accepted under.
pub const SIGNATURE_SCHEME: &str = "sha256";

/// Compute the lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &[u8], message: &[u8]) -> Result<String> {
    Ok(hex::encode(mac(secret, message)?.finalize().into_bytes()))
}

/// Check a hex digest against the HMAC-SHA256 of `message` under `secret`.
///
/// The digest is decoded first and compared as bytes in constant time.
/// Malformed hex never verifies.
pub fn verify(secret: &[u8], message: &[u8], hex_digest: &str) -> bool {
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    match mac(secret, message) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

/// Derive the secret for `topic` from the master secret.
///
/// The result is the hex string sent as `hub.secret`; the hub keys its
/// notification signatures with the bytes of that string.
pub fn derive_topic_secret(master: &str, topic: &str) -> Result<String> {
    sign(master.as_bytes(), topic.as_bytes())
}

fn mac(secret: &[u8], message: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::SigningKey)?;
    mac.update(message);
    Ok(mac)
}

/// A parsed `X-Hub-Signature` header value (`<scheme>=<hexdigest>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    /// Hash algorithm label, e.g. `sha256`.
    pub scheme: &'a str,
    /// Hex encoded digest.
    pub digest: &'a str,
}

impl<'a> SignatureHeader<'a> {
    /// Split a header value at its first `=`.
    pub fn parse(value: &'a str) -> Option<Self> {
        let (scheme, digest) = value.trim().split_once('=')?;
        Some(Self { scheme, digest })
    }

    /// Whether the scheme label names the algorithm we sign with.
    pub fn is_supported(&self) -> bool {
        self.scheme.eq_ignore_ascii_case(SIGNATURE_SCHEME)
    }
}

/// Per-topic secrets issued to the hub, keyed by topic.
///
/// Every subscription request registers the secret for its own topic, so
/// overlapping subscriptions to different topics keep independent keys.
#[derive(Debug, Default)]
pub struct TopicSecrets {
    secrets: DashMap<String, String>,
}

impl TopicSecrets {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the secret issued for `topic`.
    pub fn insert(&self, topic: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(topic.into(), secret.into());
    }

    /// Forget the secret for `topic`. Returns whether one was registered.
    pub fn remove(&self, topic: &str) -> bool {
        self.secrets.remove(topic).is_some()
    }

    /// Get the secret currently issued for `topic`.
    pub fn get(&self, topic: &str) -> Option<String> {
        self.secrets.get(topic).map(|entry| entry.value().clone())
    }

    /// Check `body` against `signature` with the secret for `topic`.
    ///
    /// Unknown topics and unsupported schemes never verify.
    pub fn verify(&self, topic: &str, body: &[u8], signature: &SignatureHeader<'_>) -> bool {
        if !signature.is_supported() {
            return false;
        }
        match self.secrets.get(topic) {
            Some(secret) => verify(secret.as_bytes(), body, signature.digest),
            None => false,
        }
    }

    /// Number of topics with an issued secret.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether no secrets are registered.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
