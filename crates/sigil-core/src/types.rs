//! Wallet document model: stored UTXOs and address metadata.
//!
//! Everything in this module is a plain owned value type with string
//! keys; entities refer to each other by key, never by pointer. The
//! containing [`WalletDocument`] is persisted as a whole JSON document.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::constants::WALLET_DOC_VERSION;

/// A transaction output observed for one of the wallet's addresses.
///
/// Identity is `(chain, txid, vout)`. Entries are never deleted: spent
/// UTXOs are retained with `spent = true` as audit history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredUtxo {
    /// Chain this output lives on.
    pub chain: Chain,
    /// Hex transaction id of the creating transaction.
    pub txid: String,
    /// Output index within the creating transaction.
    pub vout: u32,
    /// Value in the chain's smallest unit. Immutable once stored.
    pub amount: u64,
    /// Hex-encoded locking script.
    #[serde(default)]
    pub script_pubkey: String,
    /// Owning wallet address.
    pub address: String,
    /// Confirmation count as last reported by the data source.
    #[serde(default)]
    pub confirmations: u32,
    /// Whether this output has been spent. Monotonic: never flips back.
    #[serde(default)]
    pub spent: bool,
    /// Txid of the spending transaction, empty when unknown or unspent.
    #[serde(default)]
    pub spent_txid: String,
    /// When this output was first observed.
    pub first_seen: DateTime<Utc>,
    /// When this record was last written.
    pub last_updated: DateTime<Utc>,
}

impl StoredUtxo {
    /// Document key: `"<chain>:<txid>:<vout>"`.
    pub fn key(&self) -> String {
        Self::make_key(self.chain, &self.txid, self.vout)
    }

    /// Build the document key for a `(chain, txid, vout)` triple.
    pub fn make_key(chain: Chain, txid: &str, vout: u32) -> String {
        format!("{chain}:{txid}:{vout}")
    }
}

impl fmt::Display for StoredUtxo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.key(), self.amount, self.chain.symbol())
    }
}

/// Metadata for a single derived wallet address.
///
/// Identity is `(chain, address)`. `has_activity` is monotonic: once an
/// address has been seen with funds it is never reported unused again.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AddressMetadata {
    /// Chain this address belongs to.
    pub chain: Chain,
    /// The address string.
    pub address: String,
    /// Full BIP-44 derivation path, e.g. `m/44'/236'/0'/0/3`.
    pub derivation_path: String,
    /// Derivation index within the external or change chain.
    pub derivation_index: u32,
    /// Whether this address is on the change chain.
    #[serde(default)]
    pub is_change: bool,
    /// User-assigned label, empty when unset.
    #[serde(default)]
    pub label: String,
    /// Whether the address has ever held funds. Monotonic.
    #[serde(default)]
    pub has_activity: bool,
    /// When the address was last scanned against the data source.
    #[serde(default)]
    pub last_scanned: Option<DateTime<Utc>>,
}

impl AddressMetadata {
    /// Document key: `"<chain>:<address>"`.
    pub fn key(&self) -> String {
        Self::make_key(self.chain, &self.address)
    }

    /// Build the document key for a `(chain, address)` pair.
    pub fn make_key(chain: Chain, address: &str) -> String {
        format!("{chain}:{address}")
    }
}

/// The versioned per-wallet document persisted as `utxos.json`.
///
/// Rewritten atomically as a whole; there is no log or delta format.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WalletDocument {
    /// Document format version. Loaders reject anything newer than
    /// [`WALLET_DOC_VERSION`].
    pub version: u32,
    /// When the document was last saved.
    pub updated_at: DateTime<Utc>,
    /// Every UTXO ever seen, spent or unspent, keyed `"<chain>:<txid>:<vout>"`.
    #[serde(default)]
    pub utxos: BTreeMap<String, StoredUtxo>,
    /// Address metadata keyed `"<chain>:<address>"`.
    #[serde(default)]
    pub addresses: BTreeMap<String, AddressMetadata>,
}

impl WalletDocument {
    /// A fresh empty document at the current version.
    pub fn new() -> Self {
        Self {
            version: WALLET_DOC_VERSION,
            updated_at: Utc::now(),
            utxos: BTreeMap::new(),
            addresses: BTreeMap::new(),
        }
    }
}

impl Default for WalletDocument {
    fn default() -> Self {
        Self::new()
    }
}
