//! # sigil-spend — transaction orchestration.
//!
//! Given a send request, aggregates UTXOs across all wallet addresses,
//! filters locally-known spends, selects or sweeps, derives change and
//! signing keys, invokes the chain-specific signer, and performs the
//! post-broadcast bookkeeping: mark-spent, cache invalidation, and the
//! agent daily counter.
//!
//! # Modules
//!
//! - [`traits`] — `ChainSigner`, `KeyDeriver`, `MetadataProvider`
//! - [`fee`] — size-based fee estimation with quote fallback
//! - [`selection`] — largest-first selection and sweep totals
//! - [`orchestrator`] — the send pipeline
//! - [`error`] — `SpendError` enum

pub mod error;
pub mod fee;
pub mod orchestrator;
pub mod selection;
pub mod traits;

// Re-exports for convenient access
pub use error::SpendError;
pub use orchestrator::{AgentContext, SendOutcome, SendRequest, TxOrchestrator};
pub use selection::Selection;
pub use traits::{
    BroadcastResult, ChainSigner, DeriveError, KeyDeriver, MetadataError, MetadataProvider,
    SignRequest, SignerError, SigningKey, SpendOutput, WalletAddress,
};
