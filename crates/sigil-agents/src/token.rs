//! Agent bearer tokens and their deterministic public identifiers.
//!
//! A token is `sigil_agt_` followed by 32 CSPRNG bytes in URL-safe
//! base64. Its token-id is `agt_` followed by the first 8 hex digits of
//! the token's SHA-256, safe to store in filenames and logs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use sigil_core::constants::{TOKEN_ID_PREFIX, TOKEN_PREFIX, TOKEN_RAW_LEN};

/// Generate a fresh bearer token from the OS CSPRNG.
pub fn generate_token() -> String {
    let raw = sigil_secrets::rng::random_bytes(TOKEN_RAW_LEN);
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(raw))
}

/// The deterministic public identifier of a token.
///
/// Pure: the same token always yields the same id, and distinct tokens
/// yield distinct ids up to the collision resistance of SHA-256.
pub fn token_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{TOKEN_ID_PREFIX}{}", &hex::encode(digest)[..8])
}

/// Whether a string has the shape of a bearer token.
pub fn looks_like_token(s: &str) -> bool {
    match s.strip_prefix(TOKEN_PREFIX) {
        Some(body) => URL_SAFE_NO_PAD
            .decode(body)
            .is_ok_and(|raw| raw.len() == TOKEN_RAW_LEN),
        None => false,
    }
}
