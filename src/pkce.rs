use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// The only challenge method the gateway sends.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Generates a cryptographically random code verifier for PKCE.
///
/// Returns a 43-character URL-safe string (32 random bytes, RFC 7636 allows
/// 43-128 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_url_safe()
}

/// Computes the S256 code challenge from a code verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a cryptographically random `OAuth2` state parameter.
///
/// Same entropy as the verifier, drawn independently.
#[must_use]
pub fn generate_state() -> String {
    random_url_safe()
}

fn random_url_safe() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
