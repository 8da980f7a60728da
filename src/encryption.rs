//! AES-256-GCM encryption for stored file content.
//!
//! Providers encrypt per-file content with authenticated encryption:
//! - AES-256-GCM (Galois/Counter Mode)
//! - 96-bit nonces (12 bytes), random per file
//! - 128-bit authentication tags for integrity
//!
//! **Design**:
//! - Format: [nonce: 12 bytes][ciphertext][tag: 16 bytes]
//! - Keys are 32 bytes (256 bits), addressed by opaque `KeyRef`
//! - A random nonce per file means two identical plaintexts encrypt to
//!   different ciphertexts, so encrypted files never deduplicate
//! - Additional provider types plug in via the `CryptoProvider` trait

use std::collections::HashMap;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{NovusError, Result};

/// Encryption algorithm identifier as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionType {
    /// No encryption
    None = 0,
    /// AES-256-GCM authenticated encryption
    Aes256Gcm = 1,
    /// Reserved for post-quantum schemes; valid identifier, no built-in
    /// provider
    QuantumSafe = 2,
}

impl EncryptionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EncryptionType::None),
            1 => Some(EncryptionType::Aes256Gcm),
            2 => Some(EncryptionType::QuantumSafe),
            _ => None,
        }
    }
}

/// Encryption key (32 bytes for AES-256)
pub type EncryptionKey = [u8; 32];

/// Opaque handle naming a key held by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRef(pub String);

impl KeyRef {
    pub fn new(name: impl Into<String>) -> Self {
        KeyRef(name.into())
    }
}

/// Nonce size for AES-GCM (96 bits / 12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits / 16 bytes)
pub const TAG_SIZE: usize = 16;

/// Overhead added by encryption (nonce + tag)
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Pluggable encryption backend. Metadata returned by `encrypt` is stored
/// alongside the ciphertext and handed back on decrypt; the built-in
/// AES-GCM provider keeps everything in the ciphertext itself and returns
/// empty metadata.
pub trait CryptoProvider: Send + Sync {
    fn encryption_type(&self) -> EncryptionType;
    fn encrypt(&self, plaintext: &[u8], key_ref: &KeyRef) -> Result<(Vec<u8>, Vec<u8>)>;
    fn decrypt(&self, ciphertext: &[u8], key_ref: &KeyRef, metadata: &[u8]) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn CryptoProvider + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CryptoProvider")
            .field(&self.encryption_type())
            .finish()
    }
}

/// AES-256-GCM provider holding keys in memory.
pub struct AesGcmProvider {
    keys: HashMap<KeyRef, EncryptionKey>,
}

impl AesGcmProvider {
    pub fn new() -> Self {
        AesGcmProvider {
            keys: HashMap::new(),
        }
    }

    /// Generate a random encryption key
    pub fn generate_key() -> EncryptionKey {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    pub fn add_key(&mut self, key_ref: KeyRef, key: EncryptionKey) {
        self.keys.insert(key_ref, key);
    }

    fn key(&self, key_ref: &KeyRef) -> Result<&EncryptionKey> {
        self.keys
            .get(key_ref)
            .ok_or_else(|| NovusError::security(format!("unknown key {:?}", key_ref.0)))
    }
}

impl Default for AesGcmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for AesGcmProvider {
    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Aes256Gcm
    }

    /// Returns ciphertext with format: [nonce][ciphertext][tag]
    fn encrypt(&self, plaintext: &[u8], key_ref: &KeyRef) -> Result<(Vec<u8>, Vec<u8>)> {
        let key = self.key(key_ref)?;
        let cipher = Aes256Gcm::new(key.into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| NovusError::security(format!("encryption failed: {}", e)))?;

        // Build output: nonce + ciphertext (which includes tag)
        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok((result, Vec::new()))
    }

    /// Expects data in format: [nonce][ciphertext][tag]
    fn decrypt(&self, data: &[u8], key_ref: &KeyRef, _metadata: &[u8]) -> Result<Vec<u8>> {
        if data.len() < ENCRYPTION_OVERHEAD {
            return Err(NovusError::security("encrypted data too short"));
        }

        let key = self.key(key_ref)?;
        let cipher = Aes256Gcm::new(key.into());

        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let ciphertext = &data[NONCE_SIZE..];

        // Decrypt and verify the authentication tag
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| NovusError::security(format!("decryption failed: {}", e)))?;

        Ok(plaintext)
    }
}

/// Provider registry keyed by on-disk encryption type.
pub struct CryptoRegistry {
    providers: HashMap<u8, Box<dyn CryptoProvider>>,
}

impl std::fmt::Debug for CryptoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CryptoRegistry {
    pub fn new() -> Self {
        CryptoRegistry {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Box<dyn CryptoProvider>) {
        self.providers
            .insert(provider.encryption_type() as u8, provider);
    }

    /// Look up the provider for an encryption type. `None` never resolves;
    /// registered types resolve to their provider, anything else is
    /// unsupported.
    pub fn provider(&self, encryption_type: EncryptionType) -> Result<&dyn CryptoProvider> {
        self.providers
            .get(&(encryption_type as u8))
            .map(|p| p.as_ref())
            .ok_or(NovusError::Unsupported {
                what: "encryption type",
                value: encryption_type as u32,
            })
    }

    pub fn is_registered(&self, encryption_type: EncryptionType) -> bool {
        self.providers.contains_key(&(encryption_type as u8))
    }
}

impl Default for CryptoRegistry {
    fn default() -> Self {
        Self::new()
    }
}
