//! Store error types.

use thiserror::Error;

/// Errors from the UTXO store and balance cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The on-disk document was written by a newer Sigil.
    #[error("wallet document version {found} is newer than supported {current}")]
    VersionTooNew {
        /// Version found in the file.
        found: u32,
        /// Highest version this build understands.
        current: u32,
    },

    /// The document exists but cannot be parsed.
    #[error("parse: {0}")]
    Parse(String),

    /// I/O error reading or writing the document.
    #[error("I/O error: {0}")]
    Io(String),

    /// A label or activity operation referenced an unknown address.
    #[error("address not found: {0}")]
    AddressNotFound(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_version_too_new() {
        let e = StoreError::VersionTooNew { found: 999, current: 1 };
        assert_eq!(
            e.to_string(),
            "wallet document version 999 is newer than supported 1"
        );
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: StoreError = io.into();
        assert!(matches!(e, StoreError::Io(_)));
    }
}
