//! Agent error types.

use sigil_core::Chain;
use thiserror::Error;

/// Errors from agent credential and policy operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// No credential file for the given wallet and agent id.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// The credential exists but is past its expiry.
    #[error("agent expired at {0}")]
    AgentExpired(String),

    /// The wallet name is outside `[A-Za-z0-9_-]{1,64}`.
    #[error("invalid wallet name: {0}")]
    InvalidWallet(String),

    /// The resolved credential path failed the traversal defense.
    #[error("invalid agent path")]
    InvalidAgentPath,

    /// The seed could not be decrypted with the presented token.
    #[error("decryption failed")]
    DecryptFailed,

    /// The policy HMAC does not verify against the presented token.
    #[error("policy integrity check failed")]
    PolicyTampered,

    /// No credential of the wallet matches the presented token.
    #[error("no credential matches the presented token")]
    TokenNoMatch,

    /// The agent is not enrolled for this chain.
    #[error("chain {0} not permitted for this agent")]
    ChainDenied(Chain),

    /// The destination is not in the non-empty allowlist.
    #[error("destination address not allowed: {0}")]
    AddrDenied(String),

    /// The amount exceeds the per-transaction limit.
    #[error("amount {amount} exceeds per-transaction limit {limit}")]
    PerTxLimit {
        /// Requested amount, in the chain's smallest unit.
        amount: String,
        /// Configured limit.
        limit: String,
    },

    /// The daily cap would be exceeded.
    #[error("daily limit exceeded: {spent} already spent, {amount} requested, cap {limit}")]
    DailyLimitExceed {
        /// Amount already spent today.
        spent: String,
        /// Requested amount.
        amount: String,
        /// Configured daily cap.
        limit: String,
    },

    /// Accumulating the spend would wrap the counter.
    #[error("daily counter overflow")]
    DailyOverflow,

    /// The counter file failed its integrity check.
    #[error("counter integrity check failed")]
    CounterTampered,

    /// An amount string or unit did not match the chain.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// I/O error on a credential or counter file.
    #[error("I/O error: {0}")]
    Io(String),

    /// A credential or counter document failed to (de)serialize.
    #[error("serialization: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_chain_denied() {
        let e = AgentError::ChainDenied(Chain::Eth);
        assert_eq!(e.to_string(), "chain eth not permitted for this agent");
    }

    #[test]
    fn display_per_tx_limit() {
        let e = AgentError::PerTxLimit {
            amount: "5000".into(),
            limit: "1000".into(),
        };
        assert_eq!(
            e.to_string(),
            "amount 5000 exceeds per-transaction limit 1000"
        );
    }
}
