//! The daily spend counter and its fail-closed loader.
//!
//! The counter is the enforcement point of the daily cap, so its loader
//! never gives an attacker a fresh baseline: only a genuinely missing
//! file yields a zero counter. A file that exists but cannot be read,
//! parsed for today, or verified yields a synthetic "maxed" counter that
//! denies all spending until the legitimate file is restored.

use std::path::Path;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use sigil_core::constants::FILE_MODE_PRIVATE;
use sigil_core::write_atomic;

use crate::error::AgentError;

type HmacSha256 = Hmac<Sha256>;

/// `spent_wei` of the maxed counter: wider than any u256 value.
const MAXED_WEI_DIGITS: usize = 78;

/// One UTC day's accumulated agent spending.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DailyCounter {
    /// UTC date the counter applies to, `YYYY-MM-DD`.
    pub date: String,
    /// Satoshis spent on `date` across UTXO chains.
    pub spent_sat: u64,
    /// Wei spent on `date`, as a decimal string. Empty means zero.
    #[serde(default)]
    pub spent_wei: String,
    /// Hex HMAC over the canonical string, keyed with the agent token.
    #[serde(default)]
    pub hmac: String,
}

impl DailyCounter {
    /// A zero counter for the given date.
    pub fn fresh(date: &str) -> Self {
        Self {
            date: date.to_string(),
            spent_sat: 0,
            spent_wei: String::new(),
            hmac: String::new(),
        }
    }

    /// The fail-closed substitute: denies every spend.
    pub fn maxed(date: &str) -> Self {
        Self {
            date: date.to_string(),
            spent_sat: u64::MAX,
            spent_wei: "9".repeat(MAXED_WEI_DIGITS),
            hmac: String::new(),
        }
    }

    /// The canonical string the HMAC covers: `"<date>:<spent_sat>:<spent_wei>"`.
    pub fn canonical_string(&self) -> String {
        format!("{}:{}:{}", self.date, self.spent_sat, self.spent_wei)
    }
}

/// Today's date in UTC, `YYYY-MM-DD`.
pub fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn counter_mac(counter: &DailyCounter, token: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes()).expect("hmac accepts any key size");
    mac.update(counter.canonical_string().as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Compute the hex counter HMAC for a token.
pub fn compute_counter_hmac(counter: &DailyCounter, token: &str) -> String {
    hex::encode(counter_mac(counter, token))
}

/// Verify a counter's stored HMAC against a token in constant time.
pub fn verify_counter_hmac(counter: &DailyCounter, token: &str) -> bool {
    let Ok(stored) = hex::decode(&counter.hmac) else {
        return false;
    };
    let computed = counter_mac(counter, token);
    bool::from(stored.ct_eq(&computed))
}

/// Load today's counter from `path`, failing closed.
///
/// - Empty path: no persistence; a fresh zero counter (the baseline).
/// - Missing file: fresh zero counter. This is the only way disk state
///   can produce a zero baseline.
/// - Unreadable file: maxed counter.
/// - Parsed but dated other than today: fresh zero counter (rollover).
/// - Parsed for today but HMAC mismatch: maxed counter.
pub fn load_counter(path: &Path, token: &str) -> DailyCounter {
    let today = today_utc();
    if path.as_os_str().is_empty() {
        return DailyCounter::fresh(&today);
    }

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return DailyCounter::fresh(&today);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "counter unreadable, denying spends");
            return DailyCounter::maxed(&today);
        }
    };

    let counter: DailyCounter = match serde_json::from_slice(&bytes) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "counter unparseable, denying spends");
            return DailyCounter::maxed(&today);
        }
    };

    if counter.date != today {
        return DailyCounter::fresh(&today);
    }

    if !verify_counter_hmac(&counter, token) {
        tracing::warn!(
            path = %path.display(),
            error = %AgentError::CounterTampered,
            "counter failed integrity check, denying spends"
        );
        return DailyCounter::maxed(&today);
    }

    counter
}

/// Save a counter with a freshly recomputed HMAC. No-op on empty path.
pub fn save_counter(path: &Path, counter: &mut DailyCounter, token: &str) -> Result<(), AgentError> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    counter.hmac = compute_counter_hmac(counter, token);
    let bytes =
        serde_json::to_vec_pretty(counter).map_err(|e| AgentError::Serialization(e.to_string()))?;
    write_atomic(path, &bytes, FILE_MODE_PRIVATE)?;
    Ok(())
}
