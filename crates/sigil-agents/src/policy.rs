//! Agent spend policies and their HMAC binding.
//!
//! A policy is bound to its credential's token by HMAC-SHA-256 over a
//! canonical byte encoding. Any altered policy byte, or any different
//! token, fails verification.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Per-chain spending limits and destination allowlist.
///
/// A zero or empty numeric field means "no limit for that axis". An
/// empty allowlist means "any address"; a non-empty one is a hard
/// whitelist.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    /// Per-transaction cap in satoshis for UTXO chains. Zero = no limit.
    #[serde(default)]
    pub max_per_tx_sat: u64,
    /// Daily cap in satoshis for UTXO chains. Zero = no limit.
    #[serde(default)]
    pub max_daily_sat: u64,
    /// Per-transaction cap in wei as a decimal string. Empty = no limit.
    #[serde(default)]
    pub max_per_tx_wei: String,
    /// Daily cap in wei as a decimal string. Empty = no limit.
    #[serde(default)]
    pub max_daily_wei: String,
    /// Destination allowlist. Empty = any address. Order is preserved
    /// and significant for the HMAC.
    #[serde(default)]
    pub allowed_addrs: Vec<String>,
}

impl Policy {
    /// Whether the policy permits sending to `address`.
    pub fn allows_address(&self, address: &str) -> bool {
        self.allowed_addrs.is_empty() || self.allowed_addrs.iter().any(|a| a == address)
    }

    /// Canonical byte encoding the HMAC is computed over.
    ///
    /// Field order and separators are part of the format and must not
    /// change for existing credential files to keep verifying.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "max_per_tx_sat:{}|max_daily_sat:{}|max_per_tx_wei:{}|max_daily_wei:{}|allowed:{}",
            self.max_per_tx_sat,
            self.max_daily_sat,
            self.max_per_tx_wei,
            self.max_daily_wei,
            self.allowed_addrs.join(",")
        )
        .into_bytes()
    }
}

fn policy_mac(policy: &Policy, token: &str) -> Vec<u8> {
    // HMAC accepts any key length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(token.as_bytes()).expect("hmac accepts any key size");
    mac.update(&policy.canonical_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Compute the hex-encoded policy HMAC for a token.
pub fn compute_policy_hmac(policy: &Policy, token: &str) -> String {
    hex::encode(policy_mac(policy, token))
}

/// Verify a stored hex HMAC against a policy and token in constant time.
pub fn verify_policy_hmac(policy: &Policy, token: &str, stored_hex: &str) -> bool {
    let Ok(stored) = hex::decode(stored_hex) else {
        return false;
    };
    let computed = policy_mac(policy, token);
    bool::from(stored.ct_eq(&computed))
}
