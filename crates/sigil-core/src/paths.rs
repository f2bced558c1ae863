//! On-disk layout under the Sigil home directory.
//!
//! ```text
//! ~/.sigil/
//!   wallets/<wallet>/utxos.json
//!   wallets/<wallet>/cache/balances.json
//!   agents/<wallet>-<agent_id>.agent
//!   agents/<wallet>-<agent_id>.counter
//! ```

use std::path::PathBuf;

/// Directory name of the Sigil home under the user's home directory.
const HOME_DIR_NAME: &str = ".sigil";

/// Resolve the Sigil home directory, defaulting to `~/.sigil`.
///
/// Falls back to a relative `.sigil` when the platform home directory
/// cannot be determined.
pub fn sigil_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_DIR_NAME)
}

/// Directory holding a single wallet's files.
pub fn wallet_dir(home: &std::path::Path, wallet: &str) -> PathBuf {
    home.join("wallets").join(wallet)
}

/// Path of a wallet's UTXO document.
pub fn utxo_file(home: &std::path::Path, wallet: &str) -> PathBuf {
    wallet_dir(home, wallet).join("utxos.json")
}

/// Path of a wallet's persisted balance cache.
pub fn balance_cache_file(home: &std::path::Path, wallet: &str) -> PathBuf {
    wallet_dir(home, wallet).join("cache").join("balances.json")
}

/// Directory holding all agent credential and counter files.
pub fn agents_dir(home: &std::path::Path) -> PathBuf {
    home.join("agents")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn layout_under_home() {
        let home = Path::new("/tmp/sigil-home");
        assert_eq!(
            utxo_file(home, "main"),
            PathBuf::from("/tmp/sigil-home/wallets/main/utxos.json")
        );
        assert_eq!(
            balance_cache_file(home, "main"),
            PathBuf::from("/tmp/sigil-home/wallets/main/cache/balances.json")
        );
        assert_eq!(agents_dir(home), PathBuf::from("/tmp/sigil-home/agents"));
    }

    #[test]
    fn sigil_home_ends_with_dot_sigil() {
        assert!(sigil_home().ends_with(".sigil"));
    }
}
