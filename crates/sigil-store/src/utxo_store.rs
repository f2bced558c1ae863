//! The per-wallet UTXO and address-metadata store.
//!
//! One store owns one `utxos.json` document and all in-memory state in
//! it. A single reader-writer mutex protects the document: reads take
//! shared mode, mutations exclusive mode. Persistence is whole-document
//! through the atomic writer; the file is either entirely the pre-write
//! document or entirely the post-write one.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use sigil_core::constants::{FILE_MODE_PRIVATE, WALLET_DOC_VERSION};
use sigil_core::types::{AddressMetadata, StoredUtxo, WalletDocument};
use sigil_core::{Chain, write_atomic};

use crate::error::StoreError;

/// Thread-safe store over a wallet's UTXO document.
pub struct UtxoStore {
    path: PathBuf,
    doc: RwLock<WalletDocument>,
}

impl UtxoStore {
    /// Create a store with an empty in-memory document. Nothing is read
    /// or written until [`load`](Self::load) / [`save`](Self::save).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: RwLock::new(WalletDocument::new()),
        }
    }

    /// Create a store and load the document at `path` if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document from disk, replacing in-memory state.
    ///
    /// A missing file is success with an empty store. A version newer
    /// than [`WALLET_DOC_VERSION`] or a parse failure is an error and
    /// leaves the in-memory state untouched.
    pub fn load(&self) -> Result<(), StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no wallet document, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let parsed: WalletDocument =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse(e.to_string()))?;

        if parsed.version > WALLET_DOC_VERSION {
            return Err(StoreError::VersionTooNew {
                found: parsed.version,
                current: WALLET_DOC_VERSION,
            });
        }

        *self.doc.write() = parsed;
        Ok(())
    }

    /// Atomically write the whole document to disk.
    ///
    /// Serializes under the writer lock so no mutation can interleave
    /// with the snapshot being persisted.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut doc = self.doc.write();
        doc.updated_at = Utc::now();
        let bytes =
            serde_json::to_vec_pretty(&*doc).map_err(|e| StoreError::Parse(e.to_string()))?;
        write_atomic(&self.path, &bytes, FILE_MODE_PRIVATE)?;
        Ok(())
    }

    /// Insert or replace a UTXO by its `(chain, txid, vout)` key.
    ///
    /// `last_updated` is stamped now; `first_seen` is stamped only for
    /// entries not previously known; `amount` is immutable; a spent
    /// entry never returns to unspent.
    pub fn add_utxo(&self, utxo: StoredUtxo) {
        let key = utxo.key();
        let now = Utc::now();
        let mut doc = self.doc.write();

        match doc.utxos.get_mut(&key) {
            Some(existing) => {
                let mut merged = utxo;
                merged.amount = existing.amount;
                merged.first_seen = existing.first_seen;
                if existing.spent {
                    merged.spent = true;
                    merged.spent_txid = existing.spent_txid.clone();
                }
                merged.last_updated = now;
                *existing = merged;
            }
            None => {
                let mut fresh = utxo;
                fresh.first_seen = now;
                fresh.last_updated = now;
                doc.utxos.insert(key, fresh);
            }
        }
    }

    /// Insert or replace address metadata by its `(chain, address)` key.
    ///
    /// `has_activity` is monotonic: an existing true flag survives a
    /// replace that carries false.
    pub fn add_address(&self, address: AddressMetadata) {
        let key = address.key();
        let mut doc = self.doc.write();

        match doc.addresses.get_mut(&key) {
            Some(existing) => {
                let mut merged = address;
                merged.has_activity = merged.has_activity || existing.has_activity;
                if merged.label.is_empty() {
                    merged.label = existing.label.clone();
                }
                *existing = merged;
            }
            None => {
                doc.addresses.insert(key, address);
            }
        }
    }

    /// Mark a UTXO spent. Returns true iff the entry existed.
    ///
    /// Idempotent: a second call leaves the original spender in place.
    pub fn mark_spent(&self, chain: Chain, txid: &str, vout: u32, spender_txid: &str) -> bool {
        let key = StoredUtxo::make_key(chain, txid, vout);
        let mut doc = self.doc.write();

        match doc.utxos.get_mut(&key) {
            Some(entry) => {
                if !entry.spent {
                    entry.spent = true;
                    entry.spent_txid = spender_txid.to_string();
                }
                entry.last_updated = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Whether a UTXO is known and spent. False for unknown entries.
    pub fn is_spent(&self, chain: Chain, txid: &str, vout: u32) -> bool {
        let key = StoredUtxo::make_key(chain, txid, vout);
        self.doc.read().utxos.get(&key).is_some_and(|u| u.spent)
    }

    /// All unspent UTXOs on a chain, optionally filtered to one address.
    pub fn get_utxos(&self, chain: Chain, address: Option<&str>) -> Vec<StoredUtxo> {
        self.doc
            .read()
            .utxos
            .values()
            .filter(|u| u.chain == chain && !u.spent)
            .filter(|u| address.is_none_or(|a| u.address == a))
            .cloned()
            .collect()
    }

    /// All spent UTXOs on a chain, retained as audit history.
    pub fn get_spent_utxos(&self, chain: Chain) -> Vec<StoredUtxo> {
        self.doc
            .read()
            .utxos
            .values()
            .filter(|u| u.chain == chain && u.spent)
            .cloned()
            .collect()
    }

    /// Sum of unspent amounts on a chain. Saturates at `u64::MAX`.
    pub fn get_balance(&self, chain: Chain) -> u64 {
        self.doc
            .read()
            .utxos
            .values()
            .filter(|u| u.chain == chain && !u.spent)
            .fold(0u64, |acc, u| acc.saturating_add(u.amount))
    }

    /// Sum of unspent amounts for one address. Saturates at `u64::MAX`.
    pub fn get_address_balance(&self, chain: Chain, address: &str) -> u64 {
        self.doc
            .read()
            .utxos
            .values()
            .filter(|u| u.chain == chain && !u.spent && u.address == address)
            .fold(0u64, |acc, u| acc.saturating_add(u.amount))
    }

    /// All addresses on a chain, ordered by (change flag, derivation index).
    pub fn get_addresses(&self, chain: Chain) -> Vec<AddressMetadata> {
        let mut addrs: Vec<AddressMetadata> = self
            .doc
            .read()
            .addresses
            .values()
            .filter(|a| a.chain == chain)
            .cloned()
            .collect();
        addrs.sort_by_key(|a| (a.is_change, a.derivation_index));
        addrs
    }

    /// Addresses on a chain that have never shown activity.
    pub fn get_unused_addresses(&self, chain: Chain) -> Vec<AddressMetadata> {
        self.get_addresses(chain)
            .into_iter()
            .filter(|a| !a.has_activity)
            .collect()
    }

    /// Addresses on a chain carrying exactly the given label.
    pub fn get_addresses_by_label(&self, chain: Chain, label: &str) -> Vec<AddressMetadata> {
        self.get_addresses(chain)
            .into_iter()
            .filter(|a| a.label == label)
            .collect()
    }

    /// Look up one address record.
    pub fn get_address(&self, chain: Chain, address: &str) -> Option<AddressMetadata> {
        let key = AddressMetadata::make_key(chain, address);
        self.doc.read().addresses.get(&key).cloned()
    }

    /// Set the user label on an existing address record.
    pub fn set_address_label(
        &self,
        chain: Chain,
        address: &str,
        label: &str,
    ) -> Result<(), StoreError> {
        let key = AddressMetadata::make_key(chain, address);
        let mut doc = self.doc.write();
        match doc.addresses.get_mut(&key) {
            Some(entry) => {
                entry.label = label.to_string();
                Ok(())
            }
            None => Err(StoreError::AddressNotFound(key)),
        }
    }

    /// Set `has_activity = true` on an address record. No-op if absent.
    pub fn mark_address_used(&self, chain: Chain, address: &str) {
        let key = AddressMetadata::make_key(chain, address);
        if let Some(entry) = self.doc.write().addresses.get_mut(&key) {
            entry.has_activity = true;
        }
    }

    /// Total number of stored UTXOs, spent and unspent.
    pub fn utxo_count(&self) -> usize {
        self.doc.read().utxos.len()
    }

    /// Total number of address records.
    pub fn address_count(&self) -> usize {
        self.doc.read().addresses.len()
    }
}

impl std::fmt::Debug for UtxoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let doc = self.doc.read();
        f.debug_struct("UtxoStore")
            .field("path", &self.path)
            .field("utxos", &doc.utxos.len())
            .field("addresses", &doc.addresses.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn utxo(chain: Chain, txid: &str, vout: u32, amount: u64, address: &str) -> StoredUtxo {
        StoredUtxo {
            chain,
            txid: txid.to_string(),
            vout,
            amount,
            script_pubkey: String::new(),
            address: address.to_string(),
            confirmations: 1,
            spent: false,
            spent_txid: String::new(),
            first_seen: DateTime::<Utc>::MIN_UTC,
            last_updated: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn addr(chain: Chain, address: &str, index: u32) -> AddressMetadata {
        AddressMetadata {
            chain,
            address: address.to_string(),
            derivation_path: format!("m/44'/236'/0'/0/{index}"),
            derivation_index: index,
            is_change: false,
            label: String::new(),
            has_activity: false,
            last_scanned: None,
        }
    }

    fn temp_store() -> (UtxoStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::new(dir.path().join("utxos.json"));
        (store, dir)
    }

    #[test]
    fn load_missing_file_is_empty_success() {
        let (store, _dir) = temp_store();
        store.load().unwrap();
        assert_eq!(store.utxo_count(), 0);
    }

    #[test]
    fn save_load_roundtrip() {
        let (store, dir) = temp_store();
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, 1000, "a1"));
        store.add_utxo(utxo(Chain::Bsv, "t2", 1, 2000, "a2"));
        store.add_address(addr(Chain::Bsv, "a1", 0));
        store.set_address_label(Chain::Bsv, "a1", "savings").unwrap();
        store.mark_spent(Chain::Bsv, "t2", 1, "spender");
        store.save().unwrap();

        let reloaded = UtxoStore::open(dir.path().join("utxos.json")).unwrap();
        assert_eq!(reloaded.get_balance(Chain::Bsv), 1000);
        assert!(reloaded.is_spent(Chain::Bsv, "t2", 1));
        assert_eq!(
            reloaded.get_address(Chain::Bsv, "a1").unwrap().label,
            "savings"
        );
    }

    #[test]
    fn version_too_new_rejected_state_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utxos.json");
        std::fs::write(
            &path,
            br#"{"version":999,"updated_at":"2026-01-01T00:00:00Z","utxos":{},"addresses":{}}"#,
        )
        .unwrap();

        let store = UtxoStore::new(&path);
        let err = store.load().unwrap_err();
        assert_eq!(err, StoreError::VersionTooNew { found: 999, current: 1 });
        assert_eq!(store.utxo_count(), 0);
    }

    #[test]
    fn parse_error_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utxos.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = UtxoStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[test]
    fn add_utxo_stamps_first_seen_once() {
        let (store, _dir) = temp_store();
        store.add_utxo(utxo(Chain::Btc, "t1", 0, 500, "a"));
        let first = store.get_utxos(Chain::Btc, None)[0].first_seen;
        assert!(first > DateTime::<Utc>::MIN_UTC);

        store.add_utxo(utxo(Chain::Btc, "t1", 0, 500, "a"));
        let again = store.get_utxos(Chain::Btc, None)[0].clone();
        assert_eq!(again.first_seen, first);
        assert!(again.last_updated >= first);
    }

    #[test]
    fn add_utxo_amount_immutable() {
        let (store, _dir) = temp_store();
        store.add_utxo(utxo(Chain::Btc, "t1", 0, 500, "a"));
        store.add_utxo(utxo(Chain::Btc, "t1", 0, 999_999, "a"));
        assert_eq!(store.get_balance(Chain::Btc), 500);
    }

    #[test]
    fn add_utxo_never_clears_spent() {
        let (store, _dir) = temp_store();
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, 100, "a"));
        assert!(store.mark_spent(Chain::Bsv, "t1", 0, "sp1"));

        // A refresh re-observing the output must not resurrect it.
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, 100, "a"));
        assert!(store.is_spent(Chain::Bsv, "t1", 0));
        let spent = store.get_spent_utxos(Chain::Bsv);
        assert_eq!(spent.len(), 1);
        assert_eq!(spent[0].spent_txid, "sp1");
    }

    #[test]
    fn mark_spent_semantics() {
        let (store, _dir) = temp_store();
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, 100, "a"));

        assert!(store.mark_spent(Chain::Bsv, "t1", 0, "first"));
        // Idempotent: second call keeps the original spender.
        assert!(store.mark_spent(Chain::Bsv, "t1", 0, "second"));
        assert_eq!(store.get_spent_utxos(Chain::Bsv)[0].spent_txid, "first");

        assert!(!store.mark_spent(Chain::Bsv, "missing", 0, "x"));
        assert!(!store.is_spent(Chain::Bsv, "missing", 0));
    }

    #[test]
    fn balances_filter_by_chain_and_address() {
        let (store, _dir) = temp_store();
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, 1000, "a1"));
        store.add_utxo(utxo(Chain::Bsv, "t2", 0, 2000, "a2"));
        store.add_utxo(utxo(Chain::Btc, "t3", 0, 4000, "b1"));

        assert_eq!(store.get_balance(Chain::Bsv), 3000);
        assert_eq!(store.get_balance(Chain::Btc), 4000);
        assert_eq!(store.get_balance(Chain::Bch), 0);
        assert_eq!(store.get_address_balance(Chain::Bsv, "a1"), 1000);
        assert_eq!(store.get_utxos(Chain::Bsv, Some("a2")).len(), 1);
    }

    #[test]
    fn balance_saturates_on_overflow() {
        let (store, _dir) = temp_store();
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, u64::MAX, "a"));
        store.add_utxo(utxo(Chain::Bsv, "t2", 0, u64::MAX, "a"));
        assert_eq!(store.get_balance(Chain::Bsv), u64::MAX);
    }

    #[test]
    fn address_ordering_and_activity() {
        let (store, _dir) = temp_store();
        store.add_address(addr(Chain::Bsv, "a2", 2));
        store.add_address(addr(Chain::Bsv, "a0", 0));
        let mut change = addr(Chain::Bsv, "c0", 0);
        change.is_change = true;
        store.add_address(change);

        let addrs = store.get_addresses(Chain::Bsv);
        let order: Vec<&str> = addrs.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(order, vec!["a0", "a2", "c0"]);

        store.mark_address_used(Chain::Bsv, "a0");
        let unused: Vec<String> = store
            .get_unused_addresses(Chain::Bsv)
            .into_iter()
            .map(|a| a.address)
            .collect();
        assert_eq!(unused, vec!["a2", "c0"]);
    }

    #[test]
    fn has_activity_is_monotonic_across_replace() {
        let (store, _dir) = temp_store();
        let mut active = addr(Chain::Bsv, "a0", 0);
        active.has_activity = true;
        store.add_address(active);

        // Replace with a record claiming no activity; the flag survives.
        store.add_address(addr(Chain::Bsv, "a0", 0));
        assert!(store.get_address(Chain::Bsv, "a0").unwrap().has_activity);
    }

    #[test]
    fn label_setter_requires_existing_record() {
        let (store, _dir) = temp_store();
        let err = store
            .set_address_label(Chain::Bsv, "nope", "label")
            .unwrap_err();
        assert!(matches!(err, StoreError::AddressNotFound(_)));
    }

    #[test]
    fn labels_filter() {
        let (store, _dir) = temp_store();
        store.add_address(addr(Chain::Bsv, "a0", 0));
        store.add_address(addr(Chain::Bsv, "a1", 1));
        store.set_address_label(Chain::Bsv, "a1", "cold").unwrap();

        let labelled = store.get_addresses_by_label(Chain::Bsv, "cold");
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].address, "a1");
    }

    #[test]
    fn no_tmp_file_after_save() {
        let (store, dir) = temp_store();
        store.add_utxo(utxo(Chain::Bsv, "t1", 0, 1, "a"));
        store.save().unwrap();
        assert!(!dir.path().join("utxos.json.tmp").exists());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Balance always equals the sum of unspent amounts.
            #[test]
            fn balance_consistency(amounts in proptest::collection::vec(0u64..1_000_000, 1..20),
                                   spend_mask in proptest::collection::vec(any::<bool>(), 1..20)) {
                let dir = tempfile::tempdir().unwrap();
                let store = UtxoStore::new(dir.path().join("utxos.json"));

                let mut expected: u64 = 0;
                for (i, amount) in amounts.iter().enumerate() {
                    store.add_utxo(utxo(Chain::Bsv, &format!("t{i}"), 0, *amount, "a"));
                    let spend = spend_mask.get(i).copied().unwrap_or(false);
                    if spend {
                        store.mark_spent(Chain::Bsv, &format!("t{i}"), 0, "s");
                    } else {
                        expected = expected.saturating_add(*amount);
                    }
                }
                prop_assert_eq!(store.get_balance(Chain::Bsv), expected);
            }

            /// `spent` never transitions back to false under any op order.
            #[test]
            fn spent_is_monotonic(re_adds in 1usize..5) {
                let dir = tempfile::tempdir().unwrap();
                let store = UtxoStore::new(dir.path().join("utxos.json"));

                store.add_utxo(utxo(Chain::Btc, "t", 0, 10, "a"));
                store.mark_spent(Chain::Btc, "t", 0, "sp");
                for _ in 0..re_adds {
                    store.add_utxo(utxo(Chain::Btc, "t", 0, 10, "a"));
                    prop_assert!(store.is_spent(Chain::Btc, "t", 0));
                }
            }

            /// Any sequence of adds, spends, and label edits survives a
            /// save/load round trip with identical public observations.
            #[test]
            fn save_load_roundtrip(amounts in proptest::collection::vec(1u64..1_000_000, 1..12),
                                   spend_mask in proptest::collection::vec(any::<bool>(), 1..12),
                                   label in "[a-z]{0,8}") {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("utxos.json");
                let store = UtxoStore::new(&path);

                for (i, amount) in amounts.iter().enumerate() {
                    let address = format!("a{}", i % 3);
                    store.add_utxo(utxo(Chain::Bsv, &format!("t{i}"), 0, *amount, &address));
                    store.add_address(addr(Chain::Bsv, &address, (i % 3) as u32));
                    if spend_mask.get(i).copied().unwrap_or(false) {
                        store.mark_spent(Chain::Bsv, &format!("t{i}"), 0, "sp");
                        store.mark_address_used(Chain::Bsv, &address);
                    }
                }
                store.set_address_label(Chain::Bsv, "a0", &label).unwrap();
                store.save().unwrap();

                let reloaded = UtxoStore::open(&path).unwrap();
                prop_assert_eq!(reloaded.get_balance(Chain::Bsv), store.get_balance(Chain::Bsv));
                prop_assert_eq!(reloaded.utxo_count(), store.utxo_count());
                prop_assert_eq!(
                    reloaded.get_utxos(Chain::Bsv, None).len(),
                    store.get_utxos(Chain::Bsv, None).len()
                );
                prop_assert_eq!(reloaded.get_address(Chain::Bsv, "a0").unwrap().label, label);
                for i in 0..amounts.len() {
                    prop_assert_eq!(
                        reloaded.is_spent(Chain::Bsv, &format!("t{i}"), 0),
                        store.is_spent(Chain::Bsv, &format!("t{i}"), 0)
                    );
                }
                for a in store.get_addresses(Chain::Bsv) {
                    prop_assert_eq!(
                        reloaded.get_address(Chain::Bsv, &a.address).unwrap().has_activity,
                        a.has_activity
                    );
                }
            }
        }
    }
}
