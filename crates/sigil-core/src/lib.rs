//! # sigil-core — shared types and persistence primitives.
//!
//! Provides the chain identifier enum, the wallet document model
//! (UTXOs and address metadata), the atomic file writer every Sigil
//! component persists through, and shared constants.
//!
//! # Modules
//!
//! - [`chain`] — `Chain` enum and parsing
//! - [`types`] — `StoredUtxo`, `AddressMetadata`, `WalletDocument`
//! - [`atomic`] — write-to-temp-then-rename durable writes
//! - [`constants`] — protocol-wide defaults
//! - [`paths`] — on-disk layout under the Sigil home directory
//! - [`units`] — smallest-unit ↔ decimal display string conversion

pub mod atomic;
pub mod chain;
pub mod constants;
pub mod paths;
pub mod types;
pub mod units;

// Re-exports for convenient access
pub use atomic::write_atomic;
pub use chain::{Chain, ChainParseError};
pub use types::{AddressMetadata, StoredUtxo, WalletDocument};
