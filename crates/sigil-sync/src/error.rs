//! Sync error types.

use thiserror::Error;

use sigil_store::StoreError;

use crate::client::ClientError;

/// Errors from discovery-engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The operation observed a cancelled token or an expired deadline.
    #[error("cancelled")]
    Cancelled,

    /// The chain client failed outright (not a per-address error).
    #[error("client: {0}")]
    Client(#[from] ClientError),

    /// The final store save failed after the engine's work completed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
