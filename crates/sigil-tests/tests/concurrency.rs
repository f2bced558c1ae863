//! Concurrency behavior: linearizable store operations under parallel
//! mutation, and cancellation of in-flight engine batches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sigil_core::Chain;
use sigil_store::UtxoStore;
use sigil_sync::{ChainClient, ChainUtxo, ClientError, DiscoveryEngine};
use sigil_tests::helpers::*;

/// Parallel adds and spends keep the balance equal to the sum of what
/// was added minus what was spent, with no lost updates.
#[test]
fn parallel_store_mutations_are_linearizable() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(UtxoStore::new(dir.path().join("utxos.json")));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let txid = format!("t{t}-{i}");
                    store.add_utxo(sigil_core::types::StoredUtxo {
                        chain: Chain::Bsv,
                        txid: txid.clone(),
                        vout: 0,
                        amount: 10,
                        script_pubkey: String::new(),
                        address: format!("addr{t}"),
                        confirmations: 1,
                        spent: false,
                        spent_txid: String::new(),
                        first_seen: chrono::Utc::now(),
                        last_updated: chrono::Utc::now(),
                    });
                    if i % 2 == 0 {
                        assert!(store.mark_spent(Chain::Bsv, &txid, 0, "sp"));
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // 8 threads x 50 adds, half spent: 8 * 25 * 10 remains.
    assert_eq!(store.utxo_count(), 400);
    assert_eq!(store.get_balance(Chain::Bsv), 2000);
}

/// Concurrent readers observe a consistent document while a writer
/// saves; the saved file always parses.
#[test]
fn save_under_concurrent_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("utxos.json");
    let store = Arc::new(UtxoStore::new(&path));
    seed_addresses(&store, Chain::Bsv, 4);

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..20 {
                store.save().unwrap();
            }
        })
    };
    let reader = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..200 {
                let _ = store.get_balance(Chain::Bsv);
                let _ = store.get_addresses(Chain::Bsv);
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();

    // Whatever interleaving happened, the document on disk is whole.
    UtxoStore::open(&path).unwrap();
}

/// A client that parks forever until cancelled.
struct HangingClient;

#[async_trait]
impl ChainClient for HangingClient {
    async fn list_utxos(&self, _address: &str) -> Result<Vec<ChainUtxo>, ClientError> {
        // Far longer than any test timeout; cancellation or the
        // per-address deadline must cut this short.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Cancelling mid-batch stops the driver at the in-flight address: the
/// trailing result is the cancellation, earlier results are preserved.
#[tokio::test]
async fn refresh_batch_cancel_mid_flight() {
    let dir = tempfile::tempdir().unwrap();
    let store = UtxoStore::new(dir.path().join("utxos.json"));
    seed_addresses(&store, Chain::Bsv, 2);

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let results = DiscoveryEngine::new()
        .refresh_batch(
            &store,
            Chain::Bsv,
            &["addr0".to_string(), "addr1".to_string()],
            &HangingClient,
            None,
            &cancel,
        )
        .await;
    canceller.await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].cancelled);
    assert_eq!(results[0].address, "addr0");
}

/// A per-address deadline expires on a hanging source and the batch
/// stops with a cancellation result.
#[tokio::test]
async fn refresh_batch_deadline_expires() {
    let dir = tempfile::tempdir().unwrap();
    let store = UtxoStore::new(dir.path().join("utxos.json"));
    seed_addresses(&store, Chain::Bsv, 1);

    let results = DiscoveryEngine::new()
        .refresh_batch(
            &store,
            Chain::Bsv,
            &["addr0".to_string(), "addr1".to_string()],
            &HangingClient,
            Some(Duration::from_millis(20)),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].cancelled);
}
