//! Protocol-wide defaults. Monetary values are in the chain's smallest unit.

/// Current `utxos.json` document format version.
pub const WALLET_DOC_VERSION: u32 = 1;

/// Consecutive empty addresses after which a BIP-44 scan terminates.
pub const DEFAULT_GAP_LIMIT: usize = 20;

/// Default balance-cache staleness threshold in seconds.
pub const DEFAULT_CACHE_STALENESS_SECS: i64 = 300;

/// Default fee rate in satoshis per kilobyte, used when the fee quote fails.
pub const DEFAULT_FEE_RATE_SAT_PER_KB: u64 = 500;

/// Estimated serialized size of one P2PKH input in bytes.
pub const INPUT_SIZE_BYTES: u64 = 148;

/// Estimated serialized size of one P2PKH output in bytes.
pub const OUTPUT_SIZE_BYTES: u64 = 34;

/// Fixed transaction overhead in bytes (version, counts, locktime).
pub const TX_OVERHEAD_BYTES: u64 = 10;

/// File mode for wallet-owned documents (owner read/write).
pub const FILE_MODE_PRIVATE: u32 = 0o600;

/// Directory mode for the agents directory (owner only).
pub const DIR_MODE_PRIVATE: u32 = 0o700;

/// Maximum wallet name length accepted by the agent store.
pub const MAX_WALLET_NAME_LEN: usize = 64;

/// Prefix of every agent bearer token.
pub const TOKEN_PREFIX: &str = "sigil_agt_";

/// Prefix of every agent token-id.
pub const TOKEN_ID_PREFIX: &str = "agt_";

/// Raw entropy carried by a bearer token, in bytes.
pub const TOKEN_RAW_LEN: usize = 32;
