//! Webhook signature verification (HMAC-SHA256)

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag prefixed to the hex digest
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify `signature` against the HMAC of the raw `payload`.
///
/// Never fails loudly: a missing or empty secret, a missing header, a header
/// without the algorithm tag, malformed hex or a digest mismatch all yield
/// `false`. The digest comparison is constant time.
pub fn verify(secret: Option<&SecretString>, payload: &[u8], signature: Option<&str>) -> bool {
    let Some(secret) = secret.map(|s| s.expose_secret()).filter(|s| !s.is_empty()) else {
        return false;
    };
    let Some(provided) = signature
        .and_then(|header| header.trim().strip_prefix(SIGNATURE_PREFIX))
        .and_then(|digest| hex::decode(digest).ok())
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Compute the signature header value for a payload
pub fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Verifier bound to one shared secret
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<SecretString>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    /// Whether a non-empty secret is configured
    pub fn is_configured(&self) -> bool {
        self.secret
            .as_ref()
            .map(|s| !s.expose_secret().is_empty())
            .unwrap_or(false)
    }

    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> bool {
        verify(self.secret.as_ref(), payload, signature)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}
