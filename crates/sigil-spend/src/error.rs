//! Spend error types.

use thiserror::Error;

use sigil_agents::AgentError;

use crate::traits::{DeriveError, MetadataError, SignerError};

/// Errors from the transaction orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpendError {
    /// The destination address failed chain-specific validation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The amount string could not be parsed or was zero.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The spendable pool cannot cover the amount plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Total spendable, in the chain's smallest unit.
        have: u64,
        /// Amount plus estimated fee required.
        need: u64,
    },

    /// No spendable UTXOs remain after filtering.
    #[error("no spendable UTXOs")]
    NoSpendableUtxos,

    /// A sweep's fee consumes the entire input total.
    #[error("fee {fee} exceeds total input {total}")]
    FeeExceedsInput {
        /// Estimated fee.
        fee: u64,
        /// Total input value.
        total: u64,
    },

    /// The operation observed a cancelled token.
    #[error("cancelled")]
    Cancelled,

    /// An agent policy or counter check failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Wallet metadata could not be read or bumped.
    #[error("metadata: {0}")]
    Metadata(#[from] MetadataError),

    /// A signing key or change address could not be derived.
    #[error("key derivation: {0}")]
    KeyDerivation(#[from] DeriveError),

    /// The chain-specific signer or broadcaster failed.
    #[error("signer: {0}")]
    Signer(#[from] SignerError),
}
