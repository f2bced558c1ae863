//! Discovery-engine integration: bulk flows with fallback, source-side
//! validation, reconciliation deltas, cache persistence, and the
//! degraded-local-state send path.

use tokio_util::sync::CancellationToken;

use sigil_core::units::{format_chain_amount, parse_units};
use sigil_core::{paths, Chain};
use sigil_secrets::SecretBuffer;
use sigil_spend::{SendRequest, TxOrchestrator};
use sigil_store::{BalanceCache, BalanceEntry, UtxoStore};
use sigil_sync::DiscoveryEngine;
use sigil_tests::helpers::*;

/// Bulk scan discovers the same set as a sequential scan, and falls
/// back to sequential when the bulk transport is down.
#[tokio::test]
async fn bulk_scan_with_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    // Bulk path.
    let store = UtxoStore::new(paths::utxo_file(home, "bulk"));
    seed_addresses(&store, Chain::Bsv, 30);
    let client = ScriptedClient::new()
        .with_utxo("addr3", "t3", 700)
        .with_utxo("addr7", "t7", 300);
    let report = DiscoveryEngine::new()
        .bulk_scan(&store, Chain::Bsv, &client, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.utxos_found, 2);
    assert_eq!(store.get_balance(Chain::Bsv), 1000);
    // One bulk call, no per-address queries.
    assert_eq!(client.query_count(), 0);

    // Fallback path.
    let store2 = UtxoStore::new(paths::utxo_file(home, "fallback"));
    seed_addresses(&store2, Chain::Bsv, 5);
    let mut down = ScriptedClient::new().with_utxo("addr1", "t1", 900);
    down.bulk_fails = true;
    let report = DiscoveryEngine::new()
        .bulk_scan(&store2, Chain::Bsv, &down, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.utxos_found, 1);
    assert!(down.query_count() >= 1);
    assert_eq!(store2.get_balance(Chain::Bsv), 900);
}

/// Validation flips only what the source reports spent, and reconcile
/// reports the signed balance movement.
#[tokio::test]
async fn validate_then_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let store = UtxoStore::new(dir.path().join("utxos.json"));
    seed_addresses(&store, Chain::Bsv, 1);
    let engine = DiscoveryEngine::new();
    let cancel = CancellationToken::new();

    let client = ScriptedClient::new()
        .with_utxo("addr0", "keep", 4000)
        .with_utxo("addr0", "gone", 6000);
    engine.refresh(&store, Chain::Bsv, &client, &cancel).await.unwrap();
    assert_eq!(store.get_balance(Chain::Bsv), 10_000);

    // The source now says "gone" is spent.
    let mut validator = ScriptedClient::new();
    validator.reported_spent.insert(("gone".into(), 0));
    let report = engine
        .validate_utxos(&store, Chain::Bsv, &validator, &cancel)
        .await
        .unwrap();
    assert_eq!(report.total_checked, 2);
    assert_eq!(report.now_spent, 1);
    assert_eq!(report.still_unspent, 1);
    assert_eq!(store.get_balance(Chain::Bsv), 4000);

    // Reconcile against a source that also has a new 1000 sat output.
    let fresh = ScriptedClient::new()
        .with_utxo("addr0", "keep", 4000)
        .with_utxo("addr0", "new", 1000);
    let reconcile = engine
        .reconcile_with_chain(&store, Chain::Bsv, &fresh, &cancel)
        .await
        .unwrap();
    assert_eq!(reconcile.balance_before, 4000);
    assert_eq!(reconcile.balance_after, 5000);
    assert_eq!(reconcile.delta, 1000);
}

/// The balance cache persists store-derived balances across a restart,
/// with display strings converted exactly.
#[test]
fn cache_persists_display_balances() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();
    let cache_path = paths::balance_cache_file(home, "main");

    let cache = BalanceCache::persistent(&cache_path);
    let sat_balance = 6000u64;
    cache.set(BalanceEntry {
        chain: Chain::Bsv,
        address: "addr0".into(),
        token: String::new(),
        balance: format_chain_amount(Chain::Bsv, sat_balance),
        symbol: Chain::Bsv.symbol().into(),
        decimals: Chain::Bsv.decimals(),
        updated_at: chrono::Utc::now(),
        unconfirmed: None,
    });
    cache.save().unwrap();

    let reloaded = BalanceCache::persistent(&cache_path);
    let entry = reloaded.get(Chain::Bsv, "addr0", "").unwrap();
    assert_eq!(entry.balance, "0.00006000");
    assert_eq!(
        parse_units(&entry.balance, entry.decimals),
        Some(sat_balance)
    );
}

/// A corrupt local document degrades the send path to "no local spent
/// filtering" instead of failing: the data source's view is used as-is.
#[tokio::test]
async fn send_proceeds_when_local_state_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let utxo_path = dir.path().join("utxos.json");
    std::fs::write(&utxo_path, b"{corrupt").unwrap();

    let store = UtxoStore::new(&utxo_path);
    let cache = BalanceCache::in_memory();
    let client = ScriptedClient::new().with_utxo("a0", "tx0", 80_000);
    let signer = ScriptedSigner::default();
    let metadata = TestMetadata::with_receive_addresses(&["a0"]);

    let orch = TxOrchestrator::new(&store, &cache, &client, &signer, &TestDeriver, &metadata);
    let outcome = orch
        .send(
            &SendRequest {
                chain: Chain::Bsv,
                to: "1Dest".into(),
                amount: Some("10000".into()),
                sweep_all: false,
                validate_with_source: false,
            },
            &SecretBuffer::from_vec(vec![2u8; 32]),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.broadcast.hash, "scripted-tx");
    assert_eq!(outcome.inputs_spent, 1);
}

/// Scanning records per-address errors without resetting the gap
/// counter; a flaky source can terminate the scan early.
#[tokio::test]
async fn flaky_source_terminates_scan_early() {
    let dir = tempfile::tempdir().unwrap();
    let store = UtxoStore::new(dir.path().join("utxos.json"));
    seed_addresses(&store, Chain::Bsv, 40);

    // Activity exists at addr30, but every earlier address errors; the
    // gap counter still terminates the scan before reaching it.
    let mut client = ScriptedClient::new().with_utxo("addr30", "t30", 5000);
    for i in 0..30 {
        client.failing.insert(format!("addr{i}"));
    }

    let report = DiscoveryEngine::with_gap_limit(10)
        .scan_wallet(&store, Chain::Bsv, &client, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.addresses_scanned, 10);
    assert_eq!(report.errors.len(), 10);
    assert_eq!(report.utxos_found, 0);
    assert_eq!(store.get_balance(Chain::Bsv), 0);
}
