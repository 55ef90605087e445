//! This server's Ed25519 identity for outbound requests.
//!
//! Room queries are signed so remote servers will answer them:
//!
//! ```text
//! Authorization: NexusFederation origin="nexus.example.com",
//!                key="ed25519:3f9a2c4b1d0e",
//!                sig="<base64url-encoded-signature>"
//! ```
//!
//! The signed bytes are the canonical JSON (sorted keys, no whitespace) of
//! `{"destination", "method", "origin", "uri"}`.

use std::collections::BTreeMap;

use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;

use crate::{error::FederationError, types::ServerName};

/// The local server's signing key.
pub struct OriginKey {
    /// Key ID in the format `ed25519:<12-char-hex>`.
    pub key_id: String,
    signing_key: SigningKey,
}

impl OriginKey {
    /// Generate a brand-new random key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild from a hex-encoded 32-byte seed.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, FederationError> {
        let seed = hex::decode(seed_hex.trim())
            .map_err(|e| FederationError::KeyLoad(format!("seed is not hex: {e}")))?;
        let bytes: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| FederationError::KeyLoad("seed must be exactly 32 bytes".into()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        // First 6 bytes of the public key as a short fingerprint.
        let fingerprint = hex::encode(&signing_key.verifying_key().as_bytes()[..6]);
        Self { key_id: format!("ed25519:{fingerprint}"), signing_key }
    }

    /// Base64url public key, as remote servers expect to find it in our key document.
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(self.signing_key.verifying_key().as_bytes())
    }

    /// `Authorization` header value for a body-less request from `origin` to `destination`.
    pub fn authorization(
        &self,
        origin: &str,
        destination: &ServerName,
        method: &str,
        uri: &str,
    ) -> String {
        let mut signed = BTreeMap::new();
        signed.insert("destination", destination.as_str());
        signed.insert("method", method);
        signed.insert("origin", origin);
        signed.insert("uri", uri);
        // A map of strings always serialises.
        let canonical = serde_json::to_string(&signed).unwrap_or_default();

        let sig = self.signing_key.sign(canonical.as_bytes());
        let sig = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sig.to_bytes());
        format!(r#"NexusFederation origin="{origin}",key="{}",sig="{sig}""#, self.key_id)
    }
}
