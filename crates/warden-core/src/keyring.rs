//! Keyring gateway
//!
//! The orchestrator never touches key material directly. Everything goes
//! through [`KeyringGateway`], whose implementations serialise their own
//! mutations so a timer-driven lock cannot interleave with an in-flight sign.
//!
//! [`MemoryKeyring`] keeps account secrets sealed with ChaCha20-Poly1305 under
//! an Argon2id password key and holds the derived key only while unlocked.
//! Its signatures are keyed SHA-256 digests; chain-specific signature schemes
//! live in the extension's own gateway implementations.

use crate::error::{Error, Result};
use argon2::{Argon2, ParamsBuilder, Version};
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

/// Minimum password length accepted by the keyring
pub const MIN_PASSWORD_LENGTH: usize = 8;

const PASSWORD_CHECK: &[u8] = b"warden-keyring-v1";

/// How an account produces signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    /// Secret held by the keyring, unlocked by password
    Password,
    /// Ledger-style device
    Hardware,
    /// QR / read-only / injected signer
    External,
}

impl AccountKind {
    /// Only password accounts may sign several steps back to back
    pub fn supports_one_sign(&self) -> bool {
        matches!(self, AccountKind::Password)
    }
}

/// Public account data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// Account address
    pub address: String,
    /// Display name
    pub name: String,
    /// Signing capability
    pub kind: AccountKind,
}

/// New account parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    /// Display name
    pub name: String,
    /// Signing capability
    pub kind: AccountKind,
    /// Address of a hardware or external account
    #[serde(default)]
    pub address: Option<String>,
}

/// Password-encrypted account export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountExport {
    /// Account address
    pub address: String,
    /// Hex-encoded sealed secret
    pub encoded: String,
    /// Hex-encoded KDF salt
    pub salt: String,
    /// Encoding description
    pub encoding: Vec<String>,
}

/// Keyring capability consumed by the orchestrator
#[async_trait]
pub trait KeyringGateway: Send + Sync {
    /// Whether signing secrets are currently unavailable
    async fn is_locked(&self) -> bool;

    /// Drop the unlocked key; fails with [`Error::Locked`] if already locked
    async fn lock(&self) -> Result<()>;

    /// Unlock with the wallet password
    async fn unlock(&self, password: &str) -> Result<()>;

    /// Re-seal every secret under a new password
    async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()>;

    /// Add an account
    async fn create_account(&self, account: NewAccount) -> Result<AccountInfo>;

    /// All accounts
    async fn accounts(&self) -> Vec<AccountInfo>;

    /// Account by address
    async fn account(&self, address: &str) -> Option<AccountInfo> {
        self.accounts()
            .await
            .into_iter()
            .find(|a| a.address == address)
    }

    /// Sign `payload` with the account at `address`
    async fn sign(&self, address: &str, payload: &[u8]) -> Result<Vec<u8>>;

    /// Export an account encrypted with `password`
    async fn export_account(&self, address: &str, password: &str) -> Result<AccountExport>;
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Lanes
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // 64 MiB, 3 iterations, 4 lanes
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn insecure_fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn derive(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = ParamsBuilder::new()
            .m_cost(self.m_cost)
            .t_cost(self.t_cost)
            .p_cost(self.p_cost)
            .output_len(32)
            .build()
            .map_err(|e| Error::Keyring(e.to_string()))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut *key)
            .map_err(|e| Error::Keyring(e.to_string()))?;
        Ok(key)
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

// Format: [nonce(12)][ciphertext(variable)]
fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce_bytes: [u8; 12] = random_bytes();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| Error::Keyring(e.to_string()))?;

    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < 12 {
        return Err(Error::Keyring("Invalid ciphertext length".to_string()));
    }
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(&sealed[..12]), &sealed[12..])
        .map(Zeroizing::new)
        .map_err(|_| Error::InvalidPassword)
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

struct StoredAccount {
    info: AccountInfo,
    sealed_secret: Option<Vec<u8>>,
}

struct KeyringState {
    salt: [u8; 32],
    password_check: Vec<u8>,
    unlocked_key: Option<Zeroizing<[u8; 32]>>,
    accounts: Vec<StoredAccount>,
}

impl KeyringState {
    fn unlocked_key(&self) -> Result<&Zeroizing<[u8; 32]>> {
        self.unlocked_key.as_ref().ok_or(Error::Locked)
    }

    fn stored(&self, address: &str) -> Result<&StoredAccount> {
        self.accounts
            .iter()
            .find(|a| a.info.address == address)
            .ok_or_else(|| Error::NotFound(format!("account {}", address)))
    }
}

/// In-process keyring with password-sealed secrets
pub struct MemoryKeyring {
    state: Mutex<KeyringState>,
    kdf: KdfParams,
}

impl MemoryKeyring {
    /// Create an unlocked keyring protected by `password`
    pub fn new(password: &str) -> Result<Self> {
        Self::with_kdf(password, KdfParams::default())
    }

    /// Create with explicit KDF parameters
    pub fn with_kdf(password: &str, kdf: KdfParams) -> Result<Self> {
        validate_password(password)?;
        let salt: [u8; 32] = random_bytes();
        let key = kdf.derive(password, &salt)?;
        let password_check = seal(&key, PASSWORD_CHECK)?;

        Ok(Self {
            state: Mutex::new(KeyringState {
                salt,
                password_check,
                unlocked_key: Some(key),
                accounts: Vec::new(),
            }),
            kdf,
        })
    }

    fn verify(&self, state: &KeyringState, password: &str) -> Result<Zeroizing<[u8; 32]>> {
        let key = self.kdf.derive(password, &state.salt)?;
        open(&key, &state.password_check)?;
        Ok(key)
    }
}

#[async_trait]
impl KeyringGateway for MemoryKeyring {
    async fn is_locked(&self) -> bool {
        self.state.lock().await.unlocked_key.is_none()
    }

    async fn lock(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.unlocked_key.take().is_none() {
            return Err(Error::Locked);
        }
        tracing::debug!("Keyring locked");
        Ok(())
    }

    async fn unlock(&self, password: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = self.verify(&state, password)?;
        state.unlocked_key = Some(key);
        tracing::debug!("Keyring unlocked");
        Ok(())
    }

    async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        validate_password(new_password)?;
        let mut state = self.state.lock().await;
        let old_key = self.verify(&state, old_password)?;

        let salt: [u8; 32] = random_bytes();
        let new_key = self.kdf.derive(new_password, &salt)?;

        let mut resealed = Vec::with_capacity(state.accounts.len());
        for account in &state.accounts {
            let sealed = match &account.sealed_secret {
                Some(sealed) => Some(seal(&new_key, &open(&old_key, sealed)?)?),
                None => None,
            };
            resealed.push(sealed);
        }

        state.password_check = seal(&new_key, PASSWORD_CHECK)?;
        for (account, sealed) in state.accounts.iter_mut().zip(resealed) {
            account.sealed_secret = sealed;
        }
        state.salt = salt;
        state.unlocked_key = Some(new_key);
        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> Result<AccountInfo> {
        let mut state = self.state.lock().await;

        let (address, sealed_secret) = match account.kind {
            AccountKind::Password => {
                let key = state.unlocked_key()?;
                let secret = Zeroizing::new(random_bytes::<32>());
                let digest = Sha256::digest(&secret[..]);
                let address = format!("0x{}", hex::encode(&digest[..20]));
                (address, Some(seal(key, &secret[..])?))
            }
            AccountKind::Hardware | AccountKind::External => {
                let address = account.address.clone().ok_or_else(|| {
                    Error::Validation("Hardware and external accounts need an address".to_string())
                })?;
                (address, None)
            }
        };

        if state.accounts.iter().any(|a| a.info.address == address) {
            return Err(Error::Validation(format!("Account {} already exists", address)));
        }

        let info = AccountInfo {
            address,
            name: account.name,
            kind: account.kind,
        };
        state.accounts.push(StoredAccount {
            info: info.clone(),
            sealed_secret,
        });
        Ok(info)
    }

    async fn accounts(&self) -> Vec<AccountInfo> {
        let state = self.state.lock().await;
        state.accounts.iter().map(|a| a.info.clone()).collect()
    }

    async fn sign(&self, address: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        let key = state.unlocked_key()?;
        let stored = state.stored(address)?;
        let sealed = stored.sealed_secret.as_ref().ok_or_else(|| {
            Error::Keyring(format!("Account {} signs outside the keyring", address))
        })?;
        let secret = open(key, sealed)?;

        let mut hasher = Sha256::new();
        hasher.update(&secret[..]);
        hasher.update(payload);
        Ok(hasher.finalize().to_vec())
    }

    async fn export_account(&self, address: &str, password: &str) -> Result<AccountExport> {
        let state = self.state.lock().await;
        let key = self.verify(&state, password)?;
        let stored = state.stored(address)?;
        let sealed = stored
            .sealed_secret
            .as_ref()
            .ok_or_else(|| Error::Keyring(format!("Account {} has no exportable secret", address)))?;
        let secret = open(&key, sealed)?;

        let salt: [u8; 32] = random_bytes();
        let export_key = self.kdf.derive(password, &salt)?;
        Ok(AccountExport {
            address: address.to_string(),
            encoded: hex::encode(seal(&export_key, &secret[..])?),
            salt: hex::encode(salt),
            encoding: vec!["argon2id".to_string(), "chacha20-poly1305".to_string()],
        })
    }
}
