//! Sealed-box encryption of single payloads to the preferences key pair.
//!
//! Each payload gets a fresh ephemeral X25519 key. The AES-256-GCM key is
//! HKDF-SHA256 over the shared secret, salted with both public keys.
//!
//! Sealed layout (before base64):
//!   [ ephemeral public key (32) | nonce (12) | ciphertext | tag (16) ]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::key_provider::KeyHandle;

pub const EPHEMERAL_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const MIN_SEALED_LEN: usize = EPHEMERAL_KEY_LEN + NONCE_LEN + TAG_LEN;

const KDF_INFO: &[u8] = b"cloak/sealed-value/v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("sealed payload is {actual} bytes, below the minimum of {min}")]
    Truncated { actual: usize, min: usize },
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    Decrypt,
}

/// Turns payloads into base64 tokens and back using one key pair.
/// Clones share the key and the operation counter.
#[derive(Debug, Clone)]
pub struct CryptoCodec {
    key: KeyHandle,
    operations: Arc<AtomicU64>,
}

impl CryptoCodec {
    pub fn new(key: KeyHandle) -> Self {
        Self {
            key,
            operations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn key(&self) -> &KeyHandle {
        &self.key
    }

    /// Number of encrypt/decrypt calls made through this codec.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Seal `payload` to the public key and encode it as standard base64.
    pub fn encrypt(&self, payload: &[u8]) -> Result<String, CryptoError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let sealed = seal(self.key.public_key(), payload)?;
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, token: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let sealed = STANDARD.decode(token)?;
        open(self.key.secret(), self.key.public_key(), &sealed)
    }
}

/// Encrypt `plaintext` so only the holder of `recipient`'s secret can read it.
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let cipher = build_cipher(shared.as_bytes(), &ephemeral_public, recipient)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(EPHEMERAL_KEY_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt the output of [`seal`] with the recipient's key pair.
pub fn open(
    secret: &StaticSecret,
    recipient: &PublicKey,
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::Truncated {
            actual: sealed.len(),
            min: MIN_SEALED_LEN,
        });
    }

    let (ephemeral_bytes, rest) = sealed.split_at(EPHEMERAL_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicKey::from(ephemeral);

    let shared = secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let cipher = build_cipher(shared.as_bytes(), &ephemeral_public, recipient)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt)
}

fn build_cipher(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Aes256Gcm, CryptoError> {
    let mut salt = [0u8; EPHEMERAL_KEY_LEN * 2];
    salt[..EPHEMERAL_KEY_LEN].copy_from_slice(ephemeral.as_bytes());
    salt[EPHEMERAL_KEY_LEN..].copy_from_slice(recipient.as_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(Some(&salt[..]), shared)
        .expand(KDF_INFO, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Aes256Gcm::new_from_slice(&key[..]).map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}
