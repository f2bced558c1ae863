//! # sigil-agents — delegated spending authority.
//!
//! An agent holds a bearer token that unlocks a bounded slice of a
//! wallet: the wallet seed encrypted under the token, a spend policy
//! bound to the token by HMAC, and a tamper-evident daily spend
//! counter. A tampered or unreadable counter always fails closed.
//!
//! # Modules
//!
//! - [`token`] — bearer token and token-id formats
//! - [`policy`] — spend policy and its HMAC binding
//! - [`counter`] — daily spend counter with fail-closed loading
//! - [`store`] — encrypted credential files on disk
//! - [`engine`] — policy decisions: per-tx, allowlist, daily cap
//! - [`error`] — `AgentError` enum

pub mod counter;
pub mod engine;
pub mod error;
pub mod policy;
pub mod store;
pub mod token;

// Re-exports for convenient access
pub use counter::DailyCounter;
pub use engine::{check_daily_limit, record_spend, validate_transaction, Amount};
pub use error::AgentError;
pub use policy::Policy;
pub use store::{AgentCredential, AgentStore};
pub use token::{generate_token, token_id};
