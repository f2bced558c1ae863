//! Supported blockchain identifiers.
//!
//! UTXO-model chains (BSV, BTC, BCH) share the aggregation/selection
//! spend path; the account-model chain (ETH) takes the simpler path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing an unknown chain ticker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown chain: {0}")]
pub struct ChainParseError(pub String);

/// A supported blockchain.
///
/// The string form is the lowercase ticker and is used verbatim in
/// document keys (`"<chain>:<txid>:<vout>"`) and file contents, so it
/// must never change for an existing variant.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Bitcoin SV (UTXO model).
    Bsv,
    /// Bitcoin (UTXO model).
    Btc,
    /// Bitcoin Cash (UTXO model).
    Bch,
    /// Ethereum (account model).
    Eth,
}

impl Chain {
    /// All supported chains, in display order.
    pub const ALL: [Chain; 4] = [Chain::Bsv, Chain::Btc, Chain::Bch, Chain::Eth];

    /// The lowercase ticker used in document keys and on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bsv => "bsv",
            Chain::Btc => "btc",
            Chain::Bch => "bch",
            Chain::Eth => "eth",
        }
    }

    /// Whether this chain uses the UTXO model.
    ///
    /// UTXO chains go through aggregation, selection, and local
    /// spent-marking; account chains skip all three.
    pub fn is_utxo_model(&self) -> bool {
        !matches!(self, Chain::Eth)
    }

    /// Ticker symbol for display and balance-cache entries.
    pub fn symbol(&self) -> &'static str {
        match self {
            Chain::Bsv => "BSV",
            Chain::Btc => "BTC",
            Chain::Bch => "BCH",
            Chain::Eth => "ETH",
        }
    }

    /// Number of decimals of the chain's smallest unit.
    pub fn decimals(&self) -> u8 {
        match self {
            Chain::Bsv | Chain::Btc | Chain::Bch => 8,
            Chain::Eth => 18,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = ChainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bsv" => Ok(Chain::Bsv),
            "btc" => Ok(Chain::Btc),
            "bch" => Ok(Chain::Bch),
            "eth" => Ok(Chain::Eth),
            other => Err(ChainParseError(other.to_string())),
        }
    }
}
