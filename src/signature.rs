//! Webhook signature verification: lowercase hex HMAC-SHA256 over the
//! raw request body, compared in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `signature` (lowercase hex) against `HMAC-SHA256(body, secret)`,
/// using a constant-time comparison regardless of where the two strings
/// first differ.
pub fn verify(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}
