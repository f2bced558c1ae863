//! # sigil-secrets — secret material at rest and in memory.
//!
//! Provides the locked, zeroed [`SecretBuffer`] every seed and private
//! key lives in, OS-CSPRNG randomness, and password-based authenticated
//! encryption (scrypt key derivation + AES-256-GCM) with a
//! self-describing ciphertext frame.
//!
//! # Modules
//!
//! - [`buffer`] — `SecretBuffer`: zeroize-on-drop, mlock where supported
//! - [`rng`] — OS-CSPRNG fills
//! - [`crypt`] — password encryption with configurable scrypt work factor
//! - [`error`] — `SecretsError` enum

pub mod buffer;
pub mod crypt;
pub mod error;
pub mod rng;

// Re-exports for convenient access
pub use buffer::SecretBuffer;
pub use crypt::{decrypt, decrypt_into_secret, encrypt, set_work_factor, work_factor};
pub use error::SecretsError;
