//! Shared mocks and fixtures for the integration scenarios.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use sigil_core::types::AddressMetadata;
use sigil_core::Chain;
use sigil_secrets::SecretBuffer;
use sigil_spend::{
    BroadcastResult, ChainSigner, DeriveError, KeyDeriver, MetadataError, MetadataProvider,
    SignRequest, SignerError, WalletAddress,
};
use sigil_store::UtxoStore;
use sigil_sync::{
    AddressUtxoResult, BulkChainClient, ChainClient, ChainUtxo, ClientError, UtxoRef,
    UtxoValidationResult,
};

/// Lower the scrypt work factor so scenario crypto runs in microseconds.
pub fn fast_crypto() {
    sigil_secrets::set_work_factor(10);
}

/// Install a test tracing subscriber honoring `RUST_LOG`. Safe to call
/// from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a `ChainUtxo` with vout 0 and one confirmation.
pub fn chain_utxo(address: &str, txid: &str, amount: u64) -> ChainUtxo {
    ChainUtxo {
        txid: txid.to_string(),
        vout: 0,
        amount,
        script_pubkey: String::new(),
        address: address.to_string(),
        confirmations: 1,
    }
}

/// Seed `count` receive addresses named `addr<i>` into a store.
pub fn seed_addresses(store: &UtxoStore, chain: Chain, count: u32) {
    for i in 0..count {
        store.add_address(AddressMetadata {
            chain,
            address: format!("addr{i}"),
            derivation_path: format!("m/44'/236'/0'/0/{i}"),
            derivation_index: i,
            is_change: false,
            label: String::new(),
            has_activity: false,
            last_scanned: None,
        });
    }
}

/// Scriptable mock data source.
#[derive(Default)]
pub struct ScriptedClient {
    /// UTXOs per address.
    pub utxos: Mutex<HashMap<String, Vec<ChainUtxo>>>,
    /// Addresses whose fetch fails.
    pub failing: HashSet<String>,
    /// Outputs the source reports as spent during validation.
    pub reported_spent: HashSet<(String, u32)>,
    /// Whether bulk calls fail outright.
    pub bulk_fails: bool,
    /// Count of `list_utxos` calls.
    pub queries: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_utxo(self, address: &str, txid: &str, amount: u64) -> Self {
        self.utxos
            .lock()
            .entry(address.to_string())
            .or_default()
            .push(chain_utxo(address, txid, amount));
        self
    }

    /// Replace the scripted UTXO set for one address.
    pub fn set_utxos(&self, address: &str, utxos: Vec<ChainUtxo>) {
        self.utxos.lock().insert(address.to_string(), utxos);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for ScriptedClient {
    async fn list_utxos(&self, address: &str) -> Result<Vec<ChainUtxo>, ClientError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(address) {
            return Err(ClientError::Network("scripted failure".into()));
        }
        Ok(self.utxos.lock().get(address).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl BulkChainClient for ScriptedClient {
    async fn bulk_utxo_fetch(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressUtxoResult>, ClientError> {
        if self.bulk_fails {
            return Err(ClientError::Network("bulk down".into()));
        }
        let utxos = self.utxos.lock();
        Ok(addresses
            .iter()
            .map(|a| {
                if self.failing.contains(a) {
                    AddressUtxoResult {
                        address: a.clone(),
                        error: Some("scripted failure".into()),
                        ..Default::default()
                    }
                } else {
                    AddressUtxoResult {
                        address: a.clone(),
                        confirmed: utxos.get(a).cloned().unwrap_or_default(),
                        unconfirmed: Vec::new(),
                        error: None,
                    }
                }
            })
            .collect())
    }

    async fn bulk_utxo_validation(
        &self,
        refs: &[UtxoRef],
    ) -> Result<Vec<UtxoValidationResult>, ClientError> {
        Ok(refs
            .iter()
            .map(|r| UtxoValidationResult {
                txid: r.txid.clone(),
                vout: r.vout,
                spent: self.reported_spent.contains(&(r.txid.clone(), r.vout)),
                error: None,
            })
            .collect())
    }
}

/// Summary of the last request a [`ScriptedSigner`] saw.
#[derive(Debug, Clone, Default)]
pub struct SignSummary {
    pub input_count: usize,
    pub input_total: u64,
    pub outputs: Vec<(String, String)>,
    pub key_addresses: Vec<String>,
    pub change_address: String,
    pub sweep_all: bool,
}

/// Signer that accepts everything and records what it was asked to sign.
#[derive(Default)]
pub struct ScriptedSigner {
    pub fail: bool,
    pub last: Mutex<Option<SignSummary>>,
}

#[async_trait]
impl ChainSigner for ScriptedSigner {
    fn validate_address(&self, _chain: Chain, address: &str) -> bool {
        !address.is_empty() && !address.contains(' ')
    }

    async fn sign_and_broadcast(
        &self,
        request: SignRequest,
    ) -> Result<BroadcastResult, SignerError> {
        if self.fail {
            return Err(SignerError("scripted broadcast failure".into()));
        }
        *self.last.lock() = Some(SignSummary {
            input_count: request.inputs.len(),
            input_total: request.inputs.iter().map(|u| u.amount).sum(),
            outputs: request
                .outputs
                .iter()
                .map(|o| (o.address.clone(), o.amount.to_string()))
                .collect(),
            key_addresses: request.keys.iter().map(|k| k.address.clone()).collect(),
            change_address: request.change_address.clone(),
            sweep_all: request.sweep_all,
        });
        Ok(BroadcastResult {
            hash: "scripted-tx".into(),
            from: request
                .keys
                .first()
                .map(|k| k.address.clone())
                .unwrap_or_default(),
            to: request
                .outputs
                .first()
                .map(|o| o.address.clone())
                .unwrap_or_default(),
            fee: 42,
            status: "accepted".into(),
        })
    }
}

/// Deriver producing synthetic addresses and keys.
pub struct TestDeriver;

impl KeyDeriver for TestDeriver {
    fn derive_address(
        &self,
        _seed: &SecretBuffer,
        chain: Chain,
        change: bool,
        index: u32,
    ) -> Result<String, DeriveError> {
        Ok(format!("{chain}-{}-{index}", if change { "c" } else { "r" }))
    }

    fn derive_private_key(
        &self,
        _seed: &SecretBuffer,
        _chain: Chain,
        change: bool,
        index: u32,
    ) -> Result<SecretBuffer, DeriveError> {
        Ok(SecretBuffer::from_vec(vec![
            u8::from(change),
            index as u8,
            0xEE,
        ]))
    }
}

/// Metadata provider over a fixed receive-address list with an
/// in-memory change-index counter.
pub struct TestMetadata {
    pub addrs: Vec<WalletAddress>,
    pub next_change: AtomicU32,
}

impl TestMetadata {
    pub fn with_receive_addresses(addresses: &[&str]) -> Self {
        Self {
            addrs: addresses
                .iter()
                .enumerate()
                .map(|(i, a)| WalletAddress {
                    address: a.to_string(),
                    change: false,
                    index: i as u32,
                })
                .collect(),
            next_change: AtomicU32::new(0),
        }
    }
}

impl MetadataProvider for TestMetadata {
    fn wallet_name(&self) -> &str {
        "scenario-wallet"
    }

    fn wallet_addresses(&self, _chain: Chain) -> Vec<WalletAddress> {
        self.addrs.clone()
    }

    fn next_change_index(&self, _chain: Chain) -> Result<u32, MetadataError> {
        Ok(self.next_change.fetch_add(1, Ordering::SeqCst))
    }
}
