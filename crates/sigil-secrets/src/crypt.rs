//! Password-based authenticated encryption.
//!
//! scrypt derives a 256-bit key from the password; AES-256-GCM provides
//! authenticated encryption. The ciphertext frame is self-describing so
//! callers never supply a nonce or remember a work factor:
//!
//! ```text
//! magic "SGL1" (4) || log_n (1) || salt (16) || nonce (12) || ciphertext + tag
//! ```
//!
//! The scrypt work factor (log2 of N) is process-wide, clamped to
//! [10, 22], default 18. Tests lower it to keep key derivation fast.

use std::sync::atomic::{AtomicU8, Ordering};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::{Zeroize, Zeroizing};

use crate::buffer::SecretBuffer;
use crate::error::SecretsError;

/// Frame magic identifying Sigil ciphertext, version 1.
const MAGIC: &[u8; 4] = b"SGL1";

/// scrypt salt length in bytes.
const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Minimum frame size: magic + log_n + salt + nonce + auth tag.
const MIN_FRAME_LEN: usize = MAGIC.len() + 1 + SALT_LEN + NONCE_LEN + 16;

/// Lowest accepted scrypt work factor.
pub const MIN_WORK_FACTOR: u8 = 10;

/// Highest accepted scrypt work factor.
pub const MAX_WORK_FACTOR: u8 = 22;

/// Default scrypt work factor (N = 2^18).
pub const DEFAULT_WORK_FACTOR: u8 = 18;

static WORK_FACTOR: AtomicU8 = AtomicU8::new(DEFAULT_WORK_FACTOR);

/// Set the process-wide scrypt work factor.
///
/// Out-of-range values are clamped to [`MIN_WORK_FACTOR`]..=[`MAX_WORK_FACTOR`],
/// never rejected. Affects only encryptions performed after the call;
/// decryption always reads the work factor from the frame.
pub fn set_work_factor(log_n: u8) {
    let clamped = log_n.clamp(MIN_WORK_FACTOR, MAX_WORK_FACTOR);
    WORK_FACTOR.store(clamped, Ordering::Relaxed);
}

/// The current process-wide scrypt work factor.
pub fn work_factor() -> u8 {
    WORK_FACTOR.load(Ordering::Relaxed)
}

/// Derive the AES key from a password, salt, and work factor.
fn derive_key(password: &[u8], salt: &[u8], log_n: u8) -> Result<Zeroizing<[u8; 32]>, SecretsError> {
    let params = scrypt::Params::new(log_n, 8, 1, 32)
        .map_err(|e| SecretsError::Crypto(e.to_string()))?;
    let mut key = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(password, salt, &params, key.as_mut())
        .map_err(|e| SecretsError::Crypto(e.to_string()))?;
    Ok(key)
}

/// Encrypt plaintext with a password.
///
/// Generates a random salt and nonce and frames the result as described
/// in the module docs. Fails on an empty password.
pub fn encrypt(plaintext: &[u8], password: &[u8]) -> Result<Vec<u8>, SecretsError> {
    if password.is_empty() {
        return Err(SecretsError::EmptyPassword);
    }

    let log_n = work_factor();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    crate::rng::fill_random(&mut salt);
    crate::rng::fill_random(&mut nonce_bytes);

    let key = derive_key(password, &salt, log_n)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| SecretsError::Crypto(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SecretsError::Crypto(e.to_string()))?;

    let mut frame = Vec::with_capacity(MAGIC.len() + 1 + SALT_LEN + NONCE_LEN + ciphertext.len());
    frame.extend_from_slice(MAGIC);
    frame.push(log_n);
    frame.extend_from_slice(&salt);
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt a frame produced by [`encrypt`].
///
/// Returns the plaintext in a [`Zeroizing`] vector; the caller owns its
/// destruction. An authentication failure is indistinguishable from a
/// wrong password.
pub fn decrypt(frame: &[u8], password: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecretsError> {
    if password.is_empty() {
        return Err(SecretsError::EmptyPassword);
    }
    if frame.len() < MIN_FRAME_LEN {
        return Err(SecretsError::Malformed(format!(
            "frame too short: {} < {MIN_FRAME_LEN}",
            frame.len()
        )));
    }
    if &frame[..MAGIC.len()] != MAGIC {
        return Err(SecretsError::Malformed("bad magic".into()));
    }

    let log_n = frame[MAGIC.len()];
    if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&log_n) {
        return Err(SecretsError::Malformed(format!("work factor {log_n} out of range")));
    }

    let salt_start = MAGIC.len() + 1;
    let nonce_start = salt_start + SALT_LEN;
    let ct_start = nonce_start + NONCE_LEN;

    let salt = &frame[salt_start..nonce_start];
    let nonce_bytes = &frame[nonce_start..ct_start];
    let ciphertext = &frame[ct_start..];

    let key = derive_key(password, salt, log_n)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| SecretsError::Crypto(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| SecretsError::DecryptFailed)
}

/// Decrypt a frame directly into a [`SecretBuffer`].
///
/// The intermediate plaintext is moved, never copied, and is zeroed on
/// every exit path. Ownership of the returned buffer transfers to the
/// caller.
pub fn decrypt_into_secret(frame: &[u8], password: &[u8]) -> Result<SecretBuffer, SecretsError> {
    let mut plaintext = decrypt(frame, password)?;
    let buf = SecretBuffer::from_vec(std::mem::take(&mut *plaintext));
    plaintext.zeroize();
    Ok(buf)
}
