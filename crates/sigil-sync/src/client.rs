//! Chain-client interfaces consumed by the discovery engine.
//!
//! Implementations are value-type adapters wrapping a concrete data
//! source (an explorer HTTP client, a node RPC). The engine never sees
//! anything past these traits.

use async_trait::async_trait;
use thiserror::Error;

/// A UTXO as reported by a data source for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUtxo {
    /// Hex transaction id.
    pub txid: String,
    /// Output index.
    pub vout: u32,
    /// Value in the chain's smallest unit.
    pub amount: u64,
    /// Hex-encoded locking script.
    pub script_pubkey: String,
    /// Address the output pays to.
    pub address: String,
    /// Confirmation count; zero for mempool outputs.
    pub confirmations: u32,
}

/// Per-address result of a bulk UTXO fetch.
#[derive(Debug, Clone, Default)]
pub struct AddressUtxoResult {
    /// Address this result belongs to.
    pub address: String,
    /// Confirmed outputs.
    pub confirmed: Vec<ChainUtxo>,
    /// Mempool outputs.
    pub unconfirmed: Vec<ChainUtxo>,
    /// Error fetching this one address, if any.
    pub error: Option<String>,
}

/// Reference to a stored UTXO submitted for spent-status validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UtxoRef {
    /// Hex transaction id.
    pub txid: String,
    /// Output index.
    pub vout: u32,
}

/// Per-UTXO result of a bulk spent-status validation.
#[derive(Debug, Clone)]
pub struct UtxoValidationResult {
    /// Hex transaction id.
    pub txid: String,
    /// Output index.
    pub vout: u32,
    /// Whether the data source reports the output spent.
    pub spent: bool,
    /// Error validating this one output, if any.
    pub error: Option<String>,
}

/// A fee quote from the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    /// Fee rate in satoshis per kilobyte.
    pub rate_sat_per_kb: u64,
    /// Where the quote came from, for logging.
    pub source: String,
}

/// Errors from a chain client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport or data-source failure.
    #[error("network: {0}")]
    Network(String),

    /// The response could not be interpreted.
    #[error("decode: {0}")]
    Decode(String),

    /// The client does not implement this optional operation.
    #[error("unsupported operation")]
    Unsupported,
}

/// Sequential per-address data source.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// List the currently-unspent outputs of one address.
    async fn list_utxos(&self, address: &str) -> Result<Vec<ChainUtxo>, ClientError>;

    /// Current fee quote. Optional; callers fall back to a built-in
    /// default rate on any error.
    async fn get_fee_quote(&self) -> Result<FeeQuote, ClientError> {
        Err(ClientError::Unsupported)
    }
}

/// Batched data source. Every bulk client can also serve sequentially.
#[async_trait]
pub trait BulkChainClient: ChainClient {
    /// Fetch UTXOs for many addresses in one call. Per-address failures
    /// are carried in the result entries, not the outer `Result`.
    async fn bulk_utxo_fetch(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressUtxoResult>, ClientError>;

    /// Ask the data source which of the given outputs are spent.
    async fn bulk_utxo_validation(
        &self,
        refs: &[UtxoRef],
    ) -> Result<Vec<UtxoValidationResult>, ClientError>;
}
