//! Policy decisions: chain enrollment, allowlist, per-transaction and
//! daily limits.
//!
//! Sat amounts stay in `u64` with every addition checked for wrap; wei
//! amounts use arbitrary precision throughout.

use std::path::Path;

use num_bigint::BigUint;

use sigil_core::Chain;

use crate::counter::{load_counter, save_counter};
use crate::error::AgentError;
use crate::store::AgentCredential;

/// A spend amount in the chain's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amount {
    /// Satoshis, for UTXO-model chains.
    Sat(u64),
    /// Wei, for account-model chains.
    Wei(BigUint),
}

impl Amount {
    /// Parse a decimal wei string.
    pub fn wei_from_dec(s: &str) -> Result<Self, AgentError> {
        parse_biguint(s)
            .map(Amount::Wei)
            .ok_or_else(|| AgentError::InvalidAmount(s.to_string()))
    }

    /// Whether this amount's unit matches the chain's model.
    pub fn matches_chain(&self, chain: Chain) -> bool {
        match self {
            Amount::Sat(_) => chain.is_utxo_model(),
            Amount::Wei(_) => !chain.is_utxo_model(),
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Amount::Sat(v) => write!(f, "{v} sat"),
            Amount::Wei(v) => write!(f, "{v} wei"),
        }
    }
}

fn parse_biguint(s: &str) -> Option<BigUint> {
    if s.is_empty() {
        return Some(BigUint::from(0u8));
    }
    s.parse::<BigUint>().ok()
}

/// A wei limit string: empty or zero means "no limit".
fn parse_wei_limit(s: &str) -> Result<Option<BigUint>, AgentError> {
    let value = parse_biguint(s).ok_or_else(|| AgentError::InvalidAmount(s.to_string()))?;
    if value == BigUint::from(0u8) {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Decide whether a transaction is allowed before building it.
///
/// Checks, in order: chain enrollment, destination allowlist, and the
/// per-transaction limit for the chain's unit. Zero or empty limits
/// mean "no limit".
pub fn validate_transaction(
    cred: &AgentCredential,
    chain: Chain,
    to: &str,
    amount: &Amount,
) -> Result<(), AgentError> {
    if !cred.chains.contains(&chain) {
        return Err(AgentError::ChainDenied(chain));
    }
    if !cred.policy.allows_address(to) {
        return Err(AgentError::AddrDenied(to.to_string()));
    }
    if !amount.matches_chain(chain) {
        return Err(AgentError::InvalidAmount(format!(
            "{amount} is the wrong unit for {chain}"
        )));
    }

    match amount {
        Amount::Sat(requested) => {
            let limit = cred.policy.max_per_tx_sat;
            if limit > 0 && *requested > limit {
                return Err(AgentError::PerTxLimit {
                    amount: requested.to_string(),
                    limit: limit.to_string(),
                });
            }
        }
        Amount::Wei(requested) => {
            if let Some(limit) = parse_wei_limit(&cred.policy.max_per_tx_wei)? {
                if *requested > limit {
                    return Err(AgentError::PerTxLimit {
                        amount: requested.to_string(),
                        limit: limit.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Check the daily cap against the persisted counter plus `amount`.
///
/// The counter loads fail-closed (see [`crate::counter::load_counter`]);
/// a zero or empty daily limit means "no limit"; an empty counter path
/// means no persistence and a zero baseline.
pub fn check_daily_limit(
    counter_path: &Path,
    token: &str,
    cred: &AgentCredential,
    chain: Chain,
    amount: &Amount,
) -> Result<(), AgentError> {
    if !amount.matches_chain(chain) {
        return Err(AgentError::InvalidAmount(format!(
            "{amount} is the wrong unit for {chain}"
        )));
    }

    let counter = load_counter(counter_path, token);

    match amount {
        Amount::Sat(requested) => {
            let limit = cred.policy.max_daily_sat;
            if limit == 0 {
                return Ok(());
            }
            // Already at or over the cap (including the maxed fail-closed
            // counter) is a limit failure, checked before the add so it
            // cannot masquerade as overflow.
            if counter.spent_sat > limit {
                return Err(AgentError::DailyLimitExceed {
                    spent: counter.spent_sat.to_string(),
                    amount: requested.to_string(),
                    limit: limit.to_string(),
                });
            }
            let total = counter
                .spent_sat
                .checked_add(*requested)
                .ok_or(AgentError::DailyOverflow)?;
            if total > limit {
                return Err(AgentError::DailyLimitExceed {
                    spent: counter.spent_sat.to_string(),
                    amount: requested.to_string(),
                    limit: limit.to_string(),
                });
            }
        }
        Amount::Wei(requested) => {
            let Some(limit) = parse_wei_limit(&cred.policy.max_daily_wei)? else {
                return Ok(());
            };
            let spent = parse_biguint(&counter.spent_wei)
                .ok_or_else(|| AgentError::InvalidAmount(counter.spent_wei.clone()))?;
            if &spent + requested > limit {
                return Err(AgentError::DailyLimitExceed {
                    spent: spent.to_string(),
                    amount: requested.to_string(),
                    limit: limit.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Add a committed spend to the daily counter and persist it with a
/// recomputed HMAC. A zero-length path is a no-op.
pub fn record_spend(
    counter_path: &Path,
    token: &str,
    chain: Chain,
    amount: &Amount,
) -> Result<(), AgentError> {
    if counter_path.as_os_str().is_empty() {
        return Ok(());
    }
    if !amount.matches_chain(chain) {
        return Err(AgentError::InvalidAmount(format!(
            "{amount} is the wrong unit for {chain}"
        )));
    }

    let mut counter = load_counter(counter_path, token);
    match amount {
        Amount::Sat(v) => {
            counter.spent_sat = counter
                .spent_sat
                .checked_add(*v)
                .ok_or(AgentError::DailyOverflow)?;
        }
        Amount::Wei(v) => {
            let spent = parse_biguint(&counter.spent_wei)
                .ok_or_else(|| AgentError::InvalidAmount(counter.spent_wei.clone()))?;
            counter.spent_wei = (spent + v).to_string();
        }
    }
    save_counter(counter_path, &mut counter, token)
}
