//! Scan, refresh, validation, and reconciliation over a chain client.
//!
//! The engine shares the wallet's [`UtxoStore`] and owns no state of its
//! own. Per-address failures are collected into the operation's report
//! and the batch proceeds; cancellation is observed at every loop
//! boundary and stops further network calls.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sigil_core::constants::DEFAULT_GAP_LIMIT;
use sigil_core::types::{AddressMetadata, StoredUtxo};
use sigil_core::Chain;
use sigil_store::UtxoStore;

use crate::client::{AddressUtxoResult, BulkChainClient, ChainClient, ChainUtxo, UtxoRef};
use crate::error::SyncError;

/// One address's failure within a batch operation.
#[derive(Debug, Clone)]
pub struct AddressError {
    /// Address the failure belongs to.
    pub address: String,
    /// Human-readable failure detail.
    pub error: String,
}

/// Result of a gap-limit scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Number of addresses actually queried before termination.
    pub addresses_scanned: usize,
    /// Number of UTXOs discovered.
    pub utxos_found: usize,
    /// Per-address client failures, in scan order.
    pub errors: Vec<AddressError>,
    /// Wall-clock duration of the scan.
    pub duration: Duration,
}

/// Result of a refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Number of addresses successfully refreshed.
    pub addresses_refreshed: usize,
    /// Number of UTXOs the data source returned across all addresses.
    pub utxos_seen: usize,
    /// Number of previously-unspent UTXOs marked spent because they
    /// vanished from the data source.
    pub newly_spent: usize,
    /// Per-address client failures.
    pub errors: Vec<AddressError>,
    /// Wall-clock duration of the refresh.
    pub duration: Duration,
}

/// Result of a bulk spent-status validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Number of locally-unspent UTXOs submitted for validation.
    pub total_checked: usize,
    /// Number the data source still reports unspent.
    pub still_unspent: usize,
    /// Number flipped to spent locally.
    pub now_spent: usize,
    /// Per-UTXO validation errors.
    pub errors: Vec<String>,
    /// Wall-clock duration of the validation.
    pub duration: Duration,
    /// The entries flipped to spent, post-flip.
    pub spent_utxos: Vec<StoredUtxo>,
}

/// Result of a full reconciliation against the data source.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// The underlying refresh outcome.
    pub refresh: RefreshReport,
    /// Unspent balance before the reconcile.
    pub balance_before: u64,
    /// Unspent balance after the reconcile.
    pub balance_after: u64,
    /// Signed balance change in the chain's smallest unit.
    pub delta: i128,
}

impl std::fmt::Display for ScanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scanned {} addresses, found {} UTXOs ({} errors) in {:.2?}",
            self.addresses_scanned,
            self.utxos_found,
            self.errors.len(),
            self.duration
        )
    }
}

impl std::fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "refreshed {} addresses, saw {} UTXOs, marked {} spent ({} errors) in {:.2?}",
            self.addresses_refreshed,
            self.utxos_seen,
            self.newly_spent,
            self.errors.len(),
            self.duration
        )
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checked {}: {} still unspent, {} now spent ({} errors) in {:.2?}",
            self.total_checked,
            self.still_unspent,
            self.now_spent,
            self.errors.len(),
            self.duration
        )
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}; balance {} -> {} ({:+})",
            self.refresh, self.balance_before, self.balance_after, self.delta
        )
    }
}

/// Per-address outcome of the cancellable refresh-batch driver.
#[derive(Debug, Clone)]
pub struct AddressRefreshResult {
    /// Address this result belongs to.
    pub address: String,
    /// Number of UTXOs the data source returned.
    pub utxos_seen: usize,
    /// Client failure for this address, if any.
    pub error: Option<String>,
    /// Whether this entry records a cancellation or expired deadline.
    pub cancelled: bool,
}

impl AddressRefreshResult {
    fn cancelled(address: &str) -> Self {
        Self {
            address: address.to_string(),
            utxos_seen: 0,
            error: Some(SyncError::Cancelled.to_string()),
            cancelled: true,
        }
    }
}

/// The UTXO discovery and reconciliation engine.
///
/// Stateless apart from its configured gap limit; every operation takes
/// the store and client it should work against.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    gap_limit: usize,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self {
            gap_limit: DEFAULT_GAP_LIMIT,
        }
    }
}

impl DiscoveryEngine {
    /// Engine with the default gap limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a custom gap limit.
    pub fn with_gap_limit(gap_limit: usize) -> Self {
        Self { gap_limit }
    }

    /// The configured gap limit.
    pub fn gap_limit(&self) -> usize {
        self.gap_limit
    }

    /// Gap-limit scan over every address known for `chain`.
    ///
    /// Walks addresses in derivation order, querying each until the
    /// configured number of consecutive empty addresses is reached.
    /// Per-address client errors are recorded and count as empty for
    /// the gap counter, so a flaky data source can terminate a scan
    /// early. Saves once at the end.
    pub async fn scan_wallet<C>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        client: &C,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, SyncError>
    where
        C: ChainClient + ?Sized,
    {
        let started = Instant::now();
        let addresses = store.get_addresses(chain);
        let mut report = ScanReport::default();
        let mut consecutive_empty = 0usize;

        for meta in &addresses {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if consecutive_empty >= self.gap_limit {
                break;
            }

            report.addresses_scanned += 1;
            match client.list_utxos(&meta.address).await {
                Ok(utxos) => {
                    self.record_scan(store, meta, !utxos.is_empty());
                    if utxos.is_empty() {
                        consecutive_empty += 1;
                    } else {
                        consecutive_empty = 0;
                        report.utxos_found += utxos.len();
                        for u in &utxos {
                            store.add_utxo(to_stored(chain, &meta.address, u));
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(address = %meta.address, error = %e, "scan address failed");
                    report.errors.push(AddressError {
                        address: meta.address.clone(),
                        error: e.to_string(),
                    });
                    consecutive_empty += 1;
                }
            }
        }

        self.save_reporting(store, "scan", report.addresses_scanned)?;
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Refresh every address already known for `chain`.
    ///
    /// Upserts every returned UTXO, then marks spent any stored
    /// unspent UTXO the data source no longer returned (spender
    /// unknown, empty `spent_txid`). Addresses whose fetch failed are
    /// excluded from the vanished-sweep. Saves once.
    pub async fn refresh<C>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        client: &C,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, SyncError>
    where
        C: ChainClient + ?Sized,
    {
        let started = Instant::now();
        let addresses = store.get_addresses(chain);
        let mut report = RefreshReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();

        for meta in &addresses {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match client.list_utxos(&meta.address).await {
                Ok(utxos) => {
                    report.addresses_refreshed += 1;
                    report.utxos_seen += utxos.len();
                    self.record_scan(store, meta, !utxos.is_empty());
                    for u in &utxos {
                        let stored = to_stored(chain, &meta.address, u);
                        seen.insert(stored.key());
                        store.add_utxo(stored);
                    }
                }
                Err(e) => {
                    failed.insert(meta.address.clone());
                    report.errors.push(AddressError {
                        address: meta.address.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.newly_spent = sweep_vanished(store, chain, None, &seen, &failed);
        self.save_reporting(store, "refresh", report.addresses_refreshed)?;
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Refresh a single address; the vanished-sweep is scoped to it.
    pub async fn refresh_address<C>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        address: &str,
        client: &C,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, SyncError>
    where
        C: ChainClient + ?Sized,
    {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut report = RefreshReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        match client.list_utxos(address).await {
            Ok(utxos) => {
                report.addresses_refreshed = 1;
                report.utxos_seen = utxos.len();
                if let Some(meta) = store.get_address(chain, address) {
                    self.record_scan(store, &meta, !utxos.is_empty());
                }
                for u in &utxos {
                    let stored = to_stored(chain, address, u);
                    seen.insert(stored.key());
                    store.add_utxo(stored);
                }
                report.newly_spent =
                    sweep_vanished(store, chain, Some(address), &seen, &HashSet::new());
            }
            Err(e) => {
                report.errors.push(AddressError {
                    address: address.to_string(),
                    error: e.to_string(),
                });
            }
        }

        self.save_reporting(store, "refresh_address", report.addresses_refreshed)?;
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Gap-limit scan through one bulk fetch.
    ///
    /// Falls back to the sequential [`scan_wallet`](Self::scan_wallet)
    /// when the bulk call itself fails. Gap-limit termination applies
    /// in request order regardless of how the transport ordered its
    /// response.
    pub async fn bulk_scan<B>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        client: &B,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, SyncError>
    where
        B: BulkChainClient + ?Sized,
    {
        let started = Instant::now();
        let addresses = store.get_addresses(chain);
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let addr_strings: Vec<String> = addresses.iter().map(|a| a.address.clone()).collect();
        let results = match client.bulk_utxo_fetch(&addr_strings).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "bulk fetch failed, falling back to sequential scan");
                return self.scan_wallet(store, chain, client, cancel).await;
            }
        };
        let by_address = index_bulk_results(results);

        let mut report = ScanReport::default();
        let mut consecutive_empty = 0usize;

        for meta in &addresses {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if consecutive_empty >= self.gap_limit {
                break;
            }

            report.addresses_scanned += 1;
            match bulk_entry(&by_address, &meta.address) {
                Ok(utxos) => {
                    self.record_scan(store, meta, !utxos.is_empty());
                    if utxos.is_empty() {
                        consecutive_empty += 1;
                    } else {
                        consecutive_empty = 0;
                        report.utxos_found += utxos.len();
                        for u in &utxos {
                            store.add_utxo(to_stored(chain, &meta.address, u));
                        }
                    }
                }
                Err(error) => {
                    report.errors.push(AddressError {
                        address: meta.address.clone(),
                        error,
                    });
                    consecutive_empty += 1;
                }
            }
        }

        self.save_reporting(store, "bulk_scan", report.addresses_scanned)?;
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Refresh through one bulk fetch, with sequential fallback.
    pub async fn bulk_refresh<B>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        client: &B,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, SyncError>
    where
        B: BulkChainClient + ?Sized,
    {
        let started = Instant::now();
        let addresses = store.get_addresses(chain);
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let addr_strings: Vec<String> = addresses.iter().map(|a| a.address.clone()).collect();
        let results = match client.bulk_utxo_fetch(&addr_strings).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "bulk fetch failed, falling back to sequential refresh");
                return self.refresh(store, chain, client, cancel).await;
            }
        };
        let by_address = index_bulk_results(results);

        let mut report = RefreshReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();

        for meta in &addresses {
            match bulk_entry(&by_address, &meta.address) {
                Ok(utxos) => {
                    report.addresses_refreshed += 1;
                    report.utxos_seen += utxos.len();
                    self.record_scan(store, meta, !utxos.is_empty());
                    for u in &utxos {
                        let stored = to_stored(chain, &meta.address, u);
                        seen.insert(stored.key());
                        store.add_utxo(stored);
                    }
                }
                Err(error) => {
                    failed.insert(meta.address.clone());
                    report.errors.push(AddressError {
                        address: meta.address.clone(),
                        error,
                    });
                }
            }
        }

        report.newly_spent = sweep_vanished(store, chain, None, &seen, &failed);
        self.save_reporting(store, "bulk_refresh", report.addresses_refreshed)?;
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Ask the data source which locally-unspent UTXOs are in fact
    /// spent, and flip the local spent bit for each. `last_updated` is
    /// stamped on every entry examined.
    pub async fn validate_utxos<B>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        client: &B,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, SyncError>
    where
        B: BulkChainClient + ?Sized,
    {
        let started = Instant::now();
        let unspent = store.get_utxos(chain, None);
        let mut report = ValidationReport {
            total_checked: unspent.len(),
            ..Default::default()
        };
        if unspent.is_empty() {
            report.duration = started.elapsed();
            return Ok(report);
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let refs: Vec<UtxoRef> = unspent
            .iter()
            .map(|u| UtxoRef {
                txid: u.txid.clone(),
                vout: u.vout,
            })
            .collect();
        let results = client.bulk_utxo_validation(&refs).await?;

        // Every examined entry gets a fresh last_updated, spent or not.
        for u in &unspent {
            store.add_utxo(u.clone());
        }

        for r in results {
            if let Some(error) = r.error {
                report.errors.push(format!("{}:{}: {error}", r.txid, r.vout));
                continue;
            }
            if r.spent && store.mark_spent(chain, &r.txid, r.vout, "") {
                report.now_spent += 1;
            }
        }

        report.still_unspent = report.total_checked - report.now_spent;
        report.spent_utxos = store
            .get_spent_utxos(chain)
            .into_iter()
            .filter(|u| {
                unspent
                    .iter()
                    .any(|orig| orig.txid == u.txid && orig.vout == u.vout)
            })
            .collect();

        self.save_reporting(store, "validate", report.total_checked)?;
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Bulk refresh plus a signed balance delta.
    pub async fn reconcile_with_chain<B>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        client: &B,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, SyncError>
    where
        B: BulkChainClient + ?Sized,
    {
        let balance_before = store.get_balance(chain);
        let refresh = self.bulk_refresh(store, chain, client, cancel).await?;
        let balance_after = store.get_balance(chain);

        Ok(ReconcileReport {
            refresh,
            balance_before,
            balance_after,
            delta: balance_after as i128 - balance_before as i128,
        })
    }

    /// Sequentially refresh the given addresses, each under an optional
    /// per-address deadline.
    ///
    /// On an expired deadline or outer cancellation, a cancellation
    /// result is appended for the current address and the batch stops;
    /// already-completed results are preserved. The store is saved
    /// best-effort before returning.
    pub async fn refresh_batch<C>(
        &self,
        store: &UtxoStore,
        chain: Chain,
        addresses: &[String],
        client: &C,
        per_address_timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Vec<AddressRefreshResult>
    where
        C: ChainClient + ?Sized,
    {
        enum Step {
            Done(Result<Vec<ChainUtxo>, crate::client::ClientError>),
            Cancelled,
        }

        let mut results = Vec::with_capacity(addresses.len());

        for address in addresses {
            if cancel.is_cancelled() {
                results.push(AddressRefreshResult::cancelled(address));
                break;
            }

            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Cancelled,
                fetched = async {
                    match per_address_timeout {
                        Some(deadline) => {
                            tokio::time::timeout(deadline, client.list_utxos(address)).await.ok()
                        }
                        None => Some(client.list_utxos(address).await),
                    }
                } => match fetched {
                    Some(r) => Step::Done(r),
                    None => Step::Cancelled,
                },
            };

            match step {
                Step::Cancelled => {
                    results.push(AddressRefreshResult::cancelled(address));
                    break;
                }
                Step::Done(Ok(utxos)) => {
                    let mut seen: HashSet<String> = HashSet::new();
                    if let Some(meta) = store.get_address(chain, address) {
                        self.record_scan(store, &meta, !utxos.is_empty());
                    }
                    for u in &utxos {
                        let stored = to_stored(chain, address, u);
                        seen.insert(stored.key());
                        store.add_utxo(stored);
                    }
                    sweep_vanished(store, chain, Some(address), &seen, &HashSet::new());
                    results.push(AddressRefreshResult {
                        address: address.clone(),
                        utxos_seen: utxos.len(),
                        error: None,
                        cancelled: false,
                    });
                }
                Step::Done(Err(e)) => {
                    results.push(AddressRefreshResult {
                        address: address.clone(),
                        utxos_seen: 0,
                        error: Some(e.to_string()),
                        cancelled: false,
                    });
                }
            }
        }

        if let Err(e) = store.save() {
            tracing::warn!(error = %e, "refresh_batch: saving completed work failed");
        }
        results
    }

    /// Stamp scan metadata on an address record: `last_scanned = now`,
    /// `has_activity` ORed with what the scan observed.
    fn record_scan(&self, store: &UtxoStore, meta: &AddressMetadata, active: bool) {
        let mut updated = meta.clone();
        updated.last_scanned = Some(Utc::now());
        updated.has_activity = updated.has_activity || active;
        store.add_address(updated);
    }

    fn save_reporting(&self, store: &UtxoStore, op: &str, completed: usize) -> Result<(), SyncError> {
        store.save().map_err(|e| {
            tracing::warn!(op, completed, error = %e, "final save failed after engine work");
            SyncError::Store(e)
        })
    }
}

/// Convert a fetched UTXO into a fresh stored entry. The store stamps
/// the real timestamps on insert.
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

/// Mark spent every stored unspent UTXO (optionally scoped to one
/// address) whose key was not seen, excluding addresses whose fetch
/// failed. Returns the number marked.
fn sweep_vanished(
    store: &UtxoStore,
    chain: Chain,
    scope: Option<&str>,
    seen: &HashSet<String>,
    failed: &HashSet<String>,
) -> usize {
    let mut marked = 0usize;
    for u in store.get_utxos(chain, scope) {
        if failed.contains(&u.address) {
            continue;
        }
        if !seen.contains(&u.key()) && store.mark_spent(chain, &u.txid, u.vout, "") {
            marked += 1;
        }
    }
    marked
}

fn index_bulk_results(results: Vec<AddressUtxoResult>) -> HashMap<String, AddressUtxoResult> {
    results
        .into_iter()
        .map(|r| (r.address.clone(), r))
        .collect()
}

/// Look up one address in the indexed bulk response, merging confirmed
/// and unconfirmed outputs. A missing entry or an entry-level error
/// becomes a per-address error.
fn bulk_entry(
    by_address: &HashMap<String, AddressUtxoResult>,
    address: &str,
) -> Result<Vec<ChainUtxo>, String> {
    match by_address.get(address) {
        None => Err("address missing from bulk response".to_string()),
        Some(entry) => match &entry.error {
            Some(e) => Err(e.clone()),
            None => {
                let mut utxos = entry.confirmed.clone();
                utxos.extend(entry.unconfirmed.iter().cloned());
                Ok(utxos)
            }
        },
    }
}
