//! The send pipeline.
//!
//! For UTXO-model chains: validate, aggregate across every wallet
//! address, filter against local spent-marks, optionally confirm with
//! the data source, select or sweep, derive change and signing keys,
//! sign and broadcast, then mark inputs spent, invalidate the balance
//! cache, and record the agent spend. The cross-store ordering that
//! matters is enforced here: broadcast succeeds BEFORE mark-spent
//! BEFORE cache-invalidate BEFORE the daily-counter record.
//!
//! Account-model chains take the subset: policy checks, a single
//! signing key, and one cache invalidation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sigil_agents::{
    check_daily_limit, record_spend, validate_transaction, AgentCredential, Amount,
};
use sigil_core::types::StoredUtxo;
use sigil_core::Chain;
use sigil_secrets::SecretBuffer;
use sigil_store::{BalanceCache, UtxoStore};
use sigil_sync::{BulkChainClient, ChainUtxo, UtxoRef};

use crate::error::SpendError;
use crate::fee::fee_rate_or_default;
use crate::selection::{select_utxos, sweep_selection, Selection};
use crate::traits::{
    BroadcastResult, ChainSigner, KeyDeriver, MetadataProvider, SignRequest, SigningKey,
    SpendOutput, WalletAddress,
};

/// A request to send funds from the wallet.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Chain to spend on.
    pub chain: Chain,
    /// Destination address.
    pub to: String,
    /// Amount in the chain's smallest unit, as a decimal string.
    /// Ignored for sweeps.
    pub amount: Option<String>,
    /// Consume every spendable output, one output, no change.
    pub sweep_all: bool,
    /// Ask the data source to confirm inputs are unspent before
    /// signing. Degrades to skip on any validation failure.
    pub validate_with_source: bool,
}

/// Agent-mode context: the credential whose policy governs the send.
pub struct AgentContext<'a> {
    /// The loaded credential.
    pub credential: &'a AgentCredential,
    /// The bearer token presented for this send.
    pub token: &'a str,
    /// Daily counter file; empty disables persistence.
    pub counter_path: PathBuf,
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The broadcast receipt.
    pub broadcast: BroadcastResult,
    /// Number of inputs marked spent locally.
    pub inputs_spent: usize,
    /// Amount delivered to the recipient.
    pub amount: Amount,
    /// Fee estimate the transaction was built with.
    pub fee: u64,
    /// Freshly derived change address, if one was used.
    pub change_address: Option<String>,
}

/// The transaction orchestrator.
///
/// Holds short-lived references to the stores and adapters it
/// coordinates; owns nothing persistent itself. It never holds two
/// store locks at once: each store is accessed and released before the
/// next is touched.
pub struct TxOrchestrator<'a> {
    store: &'a UtxoStore,
    cache: &'a BalanceCache,
    client: &'a dyn BulkChainClient,
    signer: &'a dyn ChainSigner,
    deriver: &'a dyn KeyDeriver,
    metadata: &'a dyn MetadataProvider,
}

impl<'a> TxOrchestrator<'a> {
    /// Wire an orchestrator over its collaborators.
    pub fn new(
        store: &'a UtxoStore,
        cache: &'a BalanceCache,
        client: &'a dyn BulkChainClient,
        signer: &'a dyn ChainSigner,
        deriver: &'a dyn KeyDeriver,
        metadata: &'a dyn MetadataProvider,
    ) -> Self {
        Self {
            store,
            cache,
            client,
            signer,
            deriver,
            metadata,
        }
    }

    /// Execute a send request.
    ///
    /// The seed is borrowed for key derivation only; the caller keeps
    /// ownership and the obligation to destroy it.
    pub async fn send(
        &self,
        request: &SendRequest,
        seed: &SecretBuffer,
        agent: Option<&AgentContext<'_>>,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, SpendError> {
        if request.chain.is_utxo_model() {
            self.send_utxo(request, seed, agent, cancel).await
        } else {
            self.send_account(request, seed, agent, cancel).await
        }
    }

    async fn send_utxo(
        &self,
        request: &SendRequest,
        seed: &SecretBuffer,
        agent: Option<&AgentContext<'_>>,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, SpendError> {
        let chain = request.chain;

        if !self.signer.validate_address(chain, &request.to) {
            return Err(SpendError::InvalidAddress(request.to.clone()));
        }

        // Local state is a defense layer, not a requirement: without it
        // the send proceeds trusting the data source alone.
        let local_ok = match self.store.load() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "local UTXO state unavailable, proceeding without spent filtering");
                false
            }
        };

        let target = if request.sweep_all {
            None
        } else {
            Some(parse_sat_amount(request.amount.as_deref().unwrap_or_default())?)
        };

        // Agent policy for a known amount runs before any network work.
        // Sweeps re-run the checks once the target is computed.
        if let (Some(t), Some(ctx)) = (target, agent) {
            self.agent_checks(ctx, chain, &request.to, &Amount::Sat(t))?;
        }

        let rate = fee_rate_or_default(self.client).await;

        let wallet_addresses = self.metadata.wallet_addresses(chain);
        let mut pool = self
            .aggregate_pool(chain, &wallet_addresses, cancel)
            .await?;

        if local_ok {
            pool.retain(|u| !self.store.is_spent(chain, &u.txid, u.vout));
        }

        if request.validate_with_source && !pool.is_empty() {
            pool = self.drop_source_reported_spent(pool).await;
        }

        let selection = match target {
            None => {
                let sel = sweep_selection(&pool, rate)?;
                if let Some(ctx) = agent {
                    self.agent_checks(ctx, chain, &request.to, &Amount::Sat(sel.amount))?;
                }
                sel
            }
            Some(t) => select_utxos(&pool, t, rate)?,
        };

        let change_address = if request.sweep_all {
            None
        } else {
            let index = self.metadata.next_change_index(chain)?;
            Some(self.deriver.derive_address(seed, chain, true, index)?)
        };

        let keys = self.derive_input_keys(seed, chain, &selection, &wallet_addresses)?;

        if cancel.is_cancelled() {
            return Err(SpendError::Cancelled);
        }

        // The request owns the keys; the signer's drop scrubs them on
        // every exit path. A signing or broadcast failure aborts with
        // nothing marked spent.
        let sign_request = SignRequest {
            chain,
            inputs: selection.inputs.clone(),
            outputs: vec![SpendOutput {
                address: request.to.clone(),
                amount: Amount::Sat(selection.amount),
            }],
            keys,
            fee_rate_sat_per_kb: rate,
            change_address: change_address.clone().unwrap_or_default(),
            sweep_all: request.sweep_all,
        };
        let broadcast = self.signer.sign_and_broadcast(sign_request).await?;

        self.settle_utxo_send(request, chain, &selection, &wallet_addresses, &broadcast, agent);

        Ok(SendOutcome {
            inputs_spent: selection.inputs.len(),
            amount: Amount::Sat(selection.amount),
            fee: selection.fee,
            change_address,
            broadcast,
        })
    }

    /// Post-broadcast bookkeeping, in the one ordering that matters:
    /// mark-spent, then cache, then counter. All best-effort; a
    /// broadcast is never undone.
    fn settle_utxo_send(
        &self,
        request: &SendRequest,
        chain: Chain,
        selection: &Selection,
        wallet_addresses: &[WalletAddress],
        broadcast: &BroadcastResult,
        agent: Option<&AgentContext<'_>>,
    ) {
        for input in &selection.inputs {
            self.store
                .mark_spent(chain, &input.txid, input.vout, &broadcast.hash);
        }
        if let Err(e) = self.store.save() {
            tracing::error!(error = %e, tx = %broadcast.hash, "failed to persist spent-marks after broadcast");
        }

        if request.sweep_all {
            for wa in wallet_addresses {
                self.cache.set_expected(chain, &wa.address, "", "0.0");
            }
        } else {
            let contributing: BTreeSet<&str> = selection
                .inputs
                .iter()
                .map(|u| u.address.as_str())
                .collect();
            for address in contributing {
                self.cache.invalidate(chain, address, "");
            }
        }

        if let Some(ctx) = agent {
            if let Err(e) = record_spend(
                &ctx.counter_path,
                ctx.token,
                chain,
                &Amount::Sat(selection.amount),
            ) {
                tracing::warn!(error = %e, tx = %broadcast.hash, "daily counter record failed after broadcast");
            }
        }
    }

    async fn send_account(
        &self,
        request: &SendRequest,
        seed: &SecretBuffer,
        agent: Option<&AgentContext<'_>>,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, SpendError> {
        let chain = request.chain;

        if !self.signer.validate_address(chain, &request.to) {
            return Err(SpendError::InvalidAddress(request.to.clone()));
        }
        if request.sweep_all {
            return Err(SpendError::InvalidAmount(
                "sweep is not supported on account-model chains".into(),
            ));
        }

        let raw = request.amount.as_deref().unwrap_or_default();
        let amount = Amount::wei_from_dec(raw)
            .map_err(|_| SpendError::InvalidAmount(raw.to_string()))?;
        if amount == Amount::Wei(num_bigint::BigUint::from(0u8)) {
            return Err(SpendError::InvalidAmount("amount must be non-zero".into()));
        }

        if let Some(ctx) = agent {
            self.agent_checks(ctx, chain, &request.to, &amount)?;
        }

        let source = self
            .metadata
            .wallet_addresses(chain)
            .into_iter()
            .next()
            .ok_or_else(|| {
                SpendError::Metadata(crate::traits::MetadataError(format!(
                    "no {chain} account address in wallet metadata"
                )))
            })?;
        let key = self
            .deriver
            .derive_private_key(seed, chain, source.change, source.index)?;

        if cancel.is_cancelled() {
            return Err(SpendError::Cancelled);
        }

        let sign_request = SignRequest {
            chain,
            inputs: Vec::new(),
            outputs: vec![SpendOutput {
                address: request.to.clone(),
                amount: amount.clone(),
            }],
            keys: vec![SigningKey {
                address: source.address.clone(),
                key,
            }],
            fee_rate_sat_per_kb: 0,
            change_address: String::new(),
            sweep_all: false,
        };
        let broadcast = self.signer.sign_and_broadcast(sign_request).await?;

        self.cache.invalidate(chain, &source.address, "");
        if let Some(ctx) = agent {
            if let Err(e) = record_spend(&ctx.counter_path, ctx.token, chain, &amount) {
                tracing::warn!(error = %e, tx = %broadcast.hash, "daily counter record failed after broadcast");
            }
        }

        Ok(SendOutcome {
            inputs_spent: 0,
            amount,
            fee: broadcast.fee,
            change_address: None,
            broadcast,
        })
    }

    fn agent_checks(
        &self,
        ctx: &AgentContext<'_>,
        chain: Chain,
        to: &str,
        amount: &Amount,
    ) -> Result<(), SpendError> {
        validate_transaction(ctx.credential, chain, to, amount)?;
        check_daily_limit(&ctx.counter_path, ctx.token, ctx.credential, chain, amount)?;
        Ok(())
    }

    /// Union the UTXOs of every wallet address into one pool, deduped
    /// by key. Per-address client failures are logged and skipped.
    async fn aggregate_pool(
        &self,
        chain: Chain,
        wallet_addresses: &[WalletAddress],
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredUtxo>, SpendError> {
        let mut pool: Vec<StoredUtxo> = Vec::new();
        let mut keys: BTreeSet<String> = BTreeSet::new();

        for wa in wallet_addresses {
            if cancel.is_cancelled() {
                return Err(SpendError::Cancelled);
            }
            match self.client.list_utxos(&wa.address).await {
                Ok(utxos) => {
                    for u in &utxos {
                        let stored = to_stored(chain, &wa.address, u);
                        if keys.insert(stored.key()) {
                            pool.push(stored);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(address = %wa.address, error = %e, "skipping address in aggregation");
                }
            }
        }
        Ok(pool)
    }

    /// Drop pool entries the data source reports spent. Any failure of
    /// the validation call degrades to keeping the pool as-is.
    async fn drop_source_reported_spent(&self, pool: Vec<StoredUtxo>) -> Vec<StoredUtxo> {
        let refs: Vec<UtxoRef> = pool
            .iter()
            .map(|u| UtxoRef {
                txid: u.txid.clone(),
                vout: u.vout,
            })
            .collect();

        match self.client.bulk_utxo_validation(&refs).await {
            Ok(results) => {
                let spent: HashSet<(String, u32)> = results
                    .into_iter()
                    .filter(|r| r.error.is_none() && r.spent)
                    .map(|r| (r.txid, r.vout))
                    .collect();
                pool.into_iter()
                    .filter(|u| !spent.contains(&(u.txid.clone(), u.vout)))
                    .collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "source-side validation unavailable, skipping");
                pool
            }
        }
    }

    /// Derive one signing key per distinct input address. The keys live
    /// in scrubbed buffers owned by the returned vector.
    fn derive_input_keys(
        &self,
        seed: &SecretBuffer,
        chain: Chain,
        selection: &Selection,
        wallet_addresses: &[WalletAddress],
    ) -> Result<Vec<SigningKey>, SpendError> {
        let by_address: BTreeMap<&str, &WalletAddress> = wallet_addresses
            .iter()
            .map(|wa| (wa.address.as_str(), wa))
            .collect();

        let input_addresses: BTreeSet<&str> = selection
            .inputs
            .iter()
            .map(|u| u.address.as_str())
            .collect();

        let mut keys = Vec::with_capacity(input_addresses.len());
        for address in input_addresses {
            let wa = by_address.get(address).ok_or_else(|| {
                crate::traits::DeriveError(format!("input address {address} not in wallet metadata"))
            })?;
            let key = self
                .deriver
                .derive_private_key(seed, chain, wa.change, wa.index)?;
            keys.push(SigningKey {
                address: address.to_string(),
                key,
            });
        }
        Ok(keys)
    }
}

/// Parse an amount string in satoshis. Zero is invalid.
fn parse_sat_amount(s: &str) -> Result<u64, SpendError> {
    let value: u64 = s
        .trim()
        .parse()
        .map_err(|_| SpendError::InvalidAmount(s.to_string()))?;
    if value == 0 {
        return Err(SpendError::InvalidAmount("amount must be non-zero".into()));
    }
    Ok(value)
}

fn to_stored(chain: Chain, queried_address: &str, u: &ChainUtxo) -> StoredUtxo {
    let address = if u.address.is_empty() {
        queried_address.to_string()
    } else {
        u.address.clone()
    };
    StoredUtxo {
        chain,
        txid: u.txid.clone(),
        vout: u.vout,
        amount: u.amount,
        script_pubkey: u.script_pubkey.clone(),
        address,
        confirmations: u.confirmations,
        spent: false,
        spent_txid: String::new(),
        first_seen: Utc::now(),
        last_updated: Utc::now(),
    }
}
