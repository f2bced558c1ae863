//! In-memory balance cache with staleness policy.
//!
//! Entries are keyed by `(chain, address, token)`; the token component
//! is empty for native-asset balances. The cache can optionally persist
//! to `cache/balances.json` through the atomic writer, but it is always
//! disposable: a corrupt file is discarded with a warning, never an
//! error.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sigil_core::Chain;
use sigil_core::constants::{DEFAULT_CACHE_STALENESS_SECS, FILE_MODE_PRIVATE};
use sigil_core::write_atomic;

use crate::error::StoreError;

/// A cached balance observation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BalanceEntry {
    /// Chain the balance was observed on.
    pub chain: Chain,
    /// Address the balance belongs to.
    pub address: String,
    /// Token contract identifier; empty for the native asset.
    #[serde(default)]
    pub token: String,
    /// Confirmed balance as a decimal string in display units.
    pub balance: String,
    /// Ticker symbol for display.
    pub symbol: String,
    /// Decimal places of the unit.
    pub decimals: u8,
    /// When the observation was recorded.
    pub updated_at: DateTime<Utc>,
    /// Unconfirmed balance, when the source reports one.
    #[serde(default)]
    pub unconfirmed: Option<String>,
}

#[derive(Serialize, Deserialize, Default)]
struct CacheDocument {
    #[serde(default)]
    entries: HashMap<String, BalanceEntry>,
}

/// Thread-safe balance cache, optionally persisted.
pub struct BalanceCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, BalanceEntry>>,
}

fn cache_key(chain: Chain, address: &str, token: &str) -> String {
    format!("{chain}:{address}:{token}")
}

impl BalanceCache {
    /// A purely in-memory cache.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A cache persisted at `path`, loading any existing file.
    ///
    /// An unreadable or corrupt file starts the cache empty; cached
    /// balances are always recomputable from the data source.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheDocument>(&bytes) {
                Ok(doc) => doc.entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "discarding corrupt balance cache");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    /// Store an entry, stamping `updated_at = now` and replacing any
    /// previous observation for the same key.
    pub fn set(&self, mut entry: BalanceEntry) {
        entry.updated_at = Utc::now();
        let key = cache_key(entry.chain, &entry.address, &entry.token);
        self.entries.write().insert(key, entry);
    }

    /// Look up one entry.
    pub fn get(&self, chain: Chain, address: &str, token: &str) -> Option<BalanceEntry> {
        self.entries
            .read()
            .get(&cache_key(chain, address, token))
            .cloned()
    }

    /// Whether an entry is missing or older than `max_age`
    /// (default [`DEFAULT_CACHE_STALENESS_SECS`]).
    pub fn is_stale(
        &self,
        chain: Chain,
        address: &str,
        token: &str,
        max_age: Option<Duration>,
    ) -> bool {
        let max_age = max_age.unwrap_or_else(|| Duration::seconds(DEFAULT_CACHE_STALENESS_SECS));
        match self.get(chain, address, token) {
            Some(entry) => Utc::now() - entry.updated_at > max_age,
            None => true,
        }
    }

    /// Every entry for an address, across chains and tokens.
    pub fn get_all_for_address(&self, address: &str) -> Vec<BalanceEntry> {
        let mut found: Vec<BalanceEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| e.address == address)
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.chain, &a.token).cmp(&(b.chain, &b.token)));
        found
    }

    /// Remove entries older than `max_age`. Returns the count removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.updated_at >= cutoff);
        before - entries.len()
    }

    /// Delete one entry. Returns true if it existed.
    pub fn invalidate(&self, chain: Chain, address: &str, token: &str) -> bool {
        self.entries
            .write()
            .remove(&cache_key(chain, address, token))
            .is_some()
    }

    /// Overwrite an entry with a known-expected post-send balance,
    /// preserving any existing symbol and decimals.
    pub fn set_expected(&self, chain: Chain, address: &str, token: &str, balance: &str) {
        let key = cache_key(chain, address, token);
        let mut entries = self.entries.write();
        let (symbol, decimals, unconfirmed) = match entries.get(&key) {
            Some(existing) => (
                existing.symbol.clone(),
                existing.decimals,
                existing.unconfirmed.clone(),
            ),
            None => (chain.symbol().to_string(), chain.decimals(), None),
        };
        entries.insert(
            key,
            BalanceEntry {
                chain,
                address: address.to_string(),
                token: token.to_string(),
                balance: balance.to_string(),
                symbol,
                decimals,
                updated_at: Utc::now(),
                unconfirmed,
            },
        );
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Persist the cache if it was opened with a path. No-op otherwise.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = CacheDocument {
            entries: self.entries.read().clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::Parse(e.to_string()))?;
        write_atomic(path, &bytes, FILE_MODE_PRIVATE)?;
        Ok(())
    }
}
