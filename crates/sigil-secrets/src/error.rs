//! Secrets error types.

use thiserror::Error;

/// Errors from secret-buffer and encryption operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretsError {
    /// The password was empty.
    #[error("empty password")]
    EmptyPassword,

    /// The ciphertext frame is truncated or carries the wrong magic.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// Authentication failed. Indistinguishable from a wrong password.
    #[error("decryption failed")]
    DecryptFailed,

    /// A cipher or KDF primitive reported an error.
    #[error("crypto: {0}")]
    Crypto(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(SecretsError::EmptyPassword.to_string(), "empty password");
        assert_eq!(SecretsError::DecryptFailed.to_string(), "decryption failed");
        assert_eq!(
            SecretsError::Malformed("too short".into()).to_string(),
            "malformed ciphertext: too short"
        );
    }
}
