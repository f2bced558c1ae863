//! Interfaces the orchestrator consumes.
//!
//! Chain-specific signing, HD key derivation, and wallet metadata all
//! live outside the core; each is a small capability trait implemented
//! by value-type adapters.

use async_trait::async_trait;
use thiserror::Error;

use sigil_agents::Amount;
use sigil_core::types::StoredUtxo;
use sigil_core::Chain;
use sigil_secrets::SecretBuffer;

/// Error from a chain-specific signer or broadcaster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SignerError(pub String);

/// Error from HD key derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DeriveError(pub String);

/// Error from the wallet metadata provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MetadataError(pub String);

/// One output of a transaction under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendOutput {
    /// Destination address.
    pub address: String,
    /// Value in the chain's smallest unit.
    pub amount: Amount,
}

/// A derived signing key for one input address.
///
/// Holds the private key in a scrubbed buffer; dropping the key zeroes
/// it on every exit path.
#[derive(Debug)]
pub struct SigningKey {
    /// Address this key signs for.
    pub address: String,
    /// The private key material.
    pub key: SecretBuffer,
}

/// Everything a chain-specific signer needs to build, sign, and
/// broadcast one transaction.
///
/// The request owns its signing keys; the signer destroys them when the
/// request is dropped, success or failure.
#[derive(Debug)]
pub struct SignRequest {
    /// Chain to broadcast on.
    pub chain: Chain,
    /// Inputs to consume. Empty for account-model chains.
    pub inputs: Vec<StoredUtxo>,
    /// Outputs to create.
    pub outputs: Vec<SpendOutput>,
    /// One signing key per distinct input address.
    pub keys: Vec<SigningKey>,
    /// Fee rate in satoshis per kilobyte.
    pub fee_rate_sat_per_kb: u64,
    /// Change address; empty for sweep-all and account-model sends.
    pub change_address: String,
    /// Whether this is a sweep of every spendable output.
    pub sweep_all: bool,
}

/// Outcome of a successful broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Transaction hash on the chain.
    pub hash: String,
    /// Source description (first input address or account address).
    pub from: String,
    /// Destination address.
    pub to: String,
    /// Fee actually paid, in the chain's smallest unit.
    pub fee: u64,
    /// Broadcast status as reported by the endpoint.
    pub status: String,
}

/// Chain-specific transaction builder, signer, and broadcaster.
#[async_trait]
pub trait ChainSigner: Send + Sync {
    /// Whether `address` is well-formed for `chain`.
    fn validate_address(&self, chain: Chain, address: &str) -> bool;

    /// Build, sign, and broadcast. A failure here means nothing reached
    /// the chain; the orchestrator will not mark inputs spent.
    async fn sign_and_broadcast(&self, request: SignRequest)
        -> Result<BroadcastResult, SignerError>;
}

/// HD key derivation, treated as a pure function of the seed.
pub trait KeyDeriver: Send + Sync {
    /// Derive the address at `(chain, change, index)`.
    fn derive_address(
        &self,
        seed: &SecretBuffer,
        chain: Chain,
        change: bool,
        index: u32,
    ) -> Result<String, DeriveError>;

    /// Derive the private key at `(chain, change, index)`.
    ///
    /// Ownership of the returned buffer transfers to the caller.
    fn derive_private_key(
        &self,
        seed: &SecretBuffer,
        chain: Chain,
        change: bool,
        index: u32,
    ) -> Result<SecretBuffer, DeriveError>;
}

/// One derived wallet address with its derivation coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAddress {
    /// The address string.
    pub address: String,
    /// Whether the address is on the change chain.
    pub change: bool,
    /// Derivation index.
    pub index: u32,
}

/// Access to the wallet's derived-address metadata.
pub trait MetadataProvider: Send + Sync {
    /// The wallet's name.
    fn wallet_name(&self) -> &str;

    /// Every derived address of the wallet on `chain`, receive and
    /// change, in derivation order.
    fn wallet_addresses(&self, chain: Chain) -> Vec<WalletAddress>;

    /// Allocate the next change-chain index and persist the bumped
    /// metadata atomically before returning.
    fn next_change_index(&self, chain: Chain) -> Result<u32, MetadataError>;
}
