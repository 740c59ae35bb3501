//! Hash helpers for device fingerprints and token identifiers.

use sha2::{Digest, Sha256};

/// Stable device fingerprint derived from client signals.
///
/// The IP address is deliberately not an input, so a device keeps its
/// fingerprint across networks.
pub fn device_fingerprint(client_fingerprint: Option<&str>, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_fingerprint.unwrap_or("").trim().as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.trim().to_ascii_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a raw token, used as its revocation key when it has no jti.
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
