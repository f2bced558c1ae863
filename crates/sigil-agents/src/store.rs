//! Encrypted agent credential files.
//!
//! One JSON file per credential, `<wallet>-<agent_id>.agent`, mode 0600
//! under a 0700 agents directory. The wallet seed inside is encrypted
//! under the agent's bearer token; the spend policy is bound to the
//! token by HMAC. Candidate paths are re-resolved and checked against
//! the expected filename before any filesystem access.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sigil_core::constants::{DIR_MODE_PRIVATE, FILE_MODE_PRIVATE, MAX_WALLET_NAME_LEN};
use sigil_core::{write_atomic, Chain};
use sigil_secrets::{decrypt_into_secret, encrypt, SecretBuffer};

use crate::error::AgentError;
use crate::policy::{compute_policy_hmac, verify_policy_hmac, Policy};
use crate::token::token_id;

/// A delegated-spending credential as stored on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AgentCredential {
    /// Token-id of the enrolling token (`agt_` + 8 hex).
    pub id: String,
    /// Wallet this credential spends from.
    pub wallet_name: String,
    /// Chains the agent may spend on.
    pub chains: Vec<Chain>,
    /// Operator-assigned label.
    #[serde(default)]
    pub label: String,
    /// Spend policy, bound to the token by `policy_hmac`.
    pub policy: Policy,
    /// Wallet seed encrypted under the bearer token, base64.
    pub encrypted_seed: String,
    /// Hex HMAC binding `policy` to the token.
    pub policy_hmac: String,
    /// When the credential was created.
    pub created_at: DateTime<Utc>,
    /// Expiry; absent means the credential never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentCredential {
    /// Whether the credential is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }
}

/// Validate a wallet name: `[A-Za-z0-9_-]{1,64}`.
pub fn validate_wallet_name(name: &str) -> Result<(), AgentError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_WALLET_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AgentError::InvalidWallet(name.to_string()))
    }
}

fn valid_agent_id(id: &str) -> bool {
    match id.strip_prefix("agt_") {
        Some(body) => body.len() == 8 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// File store for agent credentials and their counters.
pub struct AgentStore {
    dir: PathBuf,
}

impl AgentStore {
    /// A store over the given agents directory. Nothing is created
    /// until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The agents directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve the credential path for `(wallet, agent_id)`.
    ///
    /// Returns an empty path for any input whose cleaned form does not
    /// terminate in the expected `<wallet>-<agent_id>.agent` filename.
    pub fn agent_path(&self, wallet: &str, agent_id: &str) -> PathBuf {
        self.defended_path(wallet, agent_id, "agent")
    }

    /// Resolve the counter path for `(wallet, agent_id)`, with the same
    /// traversal defense as [`agent_path`](Self::agent_path).
    pub fn counter_path(&self, wallet: &str, agent_id: &str) -> PathBuf {
        self.defended_path(wallet, agent_id, "counter")
    }

    fn defended_path(&self, wallet: &str, agent_id: &str, ext: &str) -> PathBuf {
        if validate_wallet_name(wallet).is_err() || !valid_agent_id(agent_id) {
            return PathBuf::new();
        }
        let expected = format!("{wallet}-{agent_id}.{ext}");
        let candidate = self.dir.join(&expected);
        // Re-resolve and require the candidate to still end in the
        // expected filename with no parent-directory components.
        let clean_tail = candidate.file_name().and_then(|f| f.to_str());
        if clean_tail != Some(expected.as_str())
            || candidate
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return PathBuf::new();
        }
        candidate
    }

    fn ensure_dir(&self) -> Result<(), AgentError> {
        if self.dir.exists() {
            return Ok(());
        }
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DIR_MODE_PRIVATE);
        }
        builder.create(&self.dir)?;
        Ok(())
    }

    /// Create a credential: encrypt the seed under the token, bind the
    /// policy with HMAC, and write the file atomically.
    ///
    /// The credential's `id`, `encrypted_seed`, `policy_hmac`, and
    /// `created_at` are derived here; whatever the caller put in those
    /// fields is overwritten.
    pub fn create(
        &self,
        mut cred: AgentCredential,
        token: &str,
        seed: &SecretBuffer,
    ) -> Result<AgentCredential, AgentError> {
        validate_wallet_name(&cred.wallet_name)?;

        cred.id = token_id(token);
        cred.encrypted_seed = BASE64.encode(
            encrypt(seed.as_slice(), token.as_bytes())
                .map_err(|e| AgentError::Serialization(e.to_string()))?,
        );
        cred.policy_hmac = compute_policy_hmac(&cred.policy, token);
        cred.created_at = Utc::now();

        let path = self.agent_path(&cred.wallet_name, &cred.id);
        if path.as_os_str().is_empty() {
            return Err(AgentError::InvalidAgentPath);
        }

        self.ensure_dir()?;
        let bytes = serde_json::to_vec_pretty(&cred)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        write_atomic(&path, &bytes, FILE_MODE_PRIVATE)?;

        tracing::info!(wallet = %cred.wallet_name, agent = %cred.id, "agent credential created");
        Ok(cred)
    }

    /// Load a credential and decrypt its seed with the presented token.
    ///
    /// Verifies the policy HMAC (constant time), rejects expired
    /// credentials, and decrypts the seed. Ownership of the returned
    /// seed buffer transfers to the caller, whose first responsibility
    /// is to arrange its destruction.
    pub fn load(
        &self,
        wallet: &str,
        agent_id: &str,
        token: &str,
    ) -> Result<(AgentCredential, SecretBuffer), AgentError> {
        validate_wallet_name(wallet)?;
        let path = self.agent_path(wallet, agent_id);
        if path.as_os_str().is_empty() {
            return Err(AgentError::InvalidAgentPath);
        }

        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::AgentNotFound(agent_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let cred: AgentCredential = serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        unlock_credential(cred, token)
    }

    /// Load the credential matching a bearer token.
    ///
    /// Fast path: the file named by the token's id. On a miss, the slow
    /// path enumerates every credential of the wallet and returns the
    /// first one the token decrypts.
    pub fn load_by_token(
        &self,
        wallet: &str,
        token: &str,
    ) -> Result<(AgentCredential, SecretBuffer), AgentError> {
        validate_wallet_name(wallet)?;

        match self.load(wallet, &token_id(token), token) {
            Ok(found) => return Ok(found),
            Err(AgentError::AgentExpired(exp)) => return Err(AgentError::AgentExpired(exp)),
            Err(e) => {
                tracing::debug!(wallet, error = %e, "token fast path missed, scanning agent files");
            }
        }

        // Slow path: try every agent file of the wallet, regardless of
        // the id its filename claims.
        for cred in self.list(wallet)? {
            if let Ok(found) = unlock_credential(cred, token) {
                return Ok(found);
            }
        }
        Err(AgentError::TokenNoMatch)
    }

    /// List every parseable credential of a wallet, without decrypting.
    ///
    /// Files that fail to parse are skipped silently.
    pub fn list(&self, wallet: &str) -> Result<Vec<AgentCredential>, AgentError> {
        validate_wallet_name(wallet)?;

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{wallet}-");
        let mut creds = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) || !name.ends_with(".agent") {
                continue;
            }
            match std::fs::read(entry.path())
                .ok()
                .and_then(|b| serde_json::from_slice::<AgentCredential>(&b).ok())
            {
                Some(cred) => creds.push(cred),
                None => {
                    tracing::debug!(file = name, "skipping unparseable agent file");
                }
            }
        }
        creds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(creds)
    }

    /// Delete a credential file and, best-effort, its counter file.
    pub fn delete(&self, wallet: &str, agent_id: &str) -> Result<(), AgentError> {
        validate_wallet_name(wallet)?;
        let path = self.agent_path(wallet, agent_id);
        if path.as_os_str().is_empty() {
            return Err(AgentError::InvalidAgentPath);
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::AgentNotFound(agent_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let counter = self.counter_path(wallet, agent_id);
        if !counter.as_os_str().is_empty() {
            if let Err(e) = std::fs::remove_file(&counter) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(agent = agent_id, error = %e, "counter file removal failed");
                }
            }
        }
        Ok(())
    }

    /// Delete every credential of a wallet. Returns the count removed.
    pub fn delete_all(&self, wallet: &str) -> Result<usize, AgentError> {
        let creds = self.list(wallet)?;
        let mut removed = 0usize;
        for cred in creds {
            match self.delete(wallet, &cred.id) {
                Ok(()) => removed += 1,
                Err(AgentError::AgentNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Verify a parsed credential against a token and decrypt its seed.
///
/// The HMAC check runs before any decryption attempt, so a wrong token
/// surfaces as [`AgentError::PolicyTampered`] without touching the
/// ciphertext.
fn unlock_credential(
    cred: AgentCredential,
    token: &str,
) -> Result<(AgentCredential, SecretBuffer), AgentError> {
    if !verify_policy_hmac(&cred.policy, token, &cred.policy_hmac) {
        return Err(AgentError::PolicyTampered);
    }
    if cred.is_expired_at(Utc::now()) {
        let exp = cred.expires_at.map(|e| e.to_rfc3339()).unwrap_or_default();
        return Err(AgentError::AgentExpired(exp));
    }

    let frame = BASE64
        .decode(&cred.encrypted_seed)
        .map_err(|_| AgentError::DecryptFailed)?;
    let seed =
        decrypt_into_secret(&frame, token.as_bytes()).map_err(|_| AgentError::DecryptFailed)?;

    Ok((cred, seed))
}
