//! Machine-bound encryption for the token cache file.
//!
//! The key is derived with scrypt from the host name and OS user name and is
//! never written anywhere, so a cache file copied to another machine or user
//! account cannot be decrypted. Records are AES-256-GCM with a 16-byte IV and
//! are laid out as `IV || Tag || Ciphertext`.

use aes::Aes256;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{AesGcm, Nonce, Tag};
use thiserror::Error;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// IV length (16 bytes).
pub const IV_LEN: usize = 16;

/// GCM authentication tag length (16 bytes).
pub const TAG_LEN: usize = 16;

/// Derived key length, AES-256.
pub const KEY_LEN: usize = 32;

/// Fixed application salt for key derivation.
const KDF_SALT: &[u8] = b"powerplatform-mcp-token-cache-v1";

/// scrypt cost: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("record too short ({0} bytes)")]
    Truncated(usize),
    #[error("authentication tag mismatch")]
    TagMismatch,
    #[error("encryption failed")]
    Encrypt,
    #[error("random IV generation failed: {0}")]
    Random(getrandom::Error),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Entropy the cache key is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub host: String,
    pub user: String,
}

impl MachineIdentity {
    /// Identity of the current host and OS user.
    pub fn current() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|e| {
                tracing::warn!("Could not read host name: {}", e);
                "unknown-host".to_string()
            });
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());

        Self { host, user }
    }

    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }
}

/// Derive the 256-bit cache key for a machine identity.
pub fn derive_key(identity: &MachineIdentity) -> Result<[u8; KEY_LEN], CryptoError> {
    let password = format!("{}-{}", identity.host, identity.user);
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), KDF_SALT, &params, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` under a fresh random IV.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    getrandom::getrandom(&mut iv).map_err(CryptoError::Random)?;

    let cipher = Aes256Gcm16::new_from_slice(key).map_err(|_| CryptoError::Encrypt)?;
    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut ciphertext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut record = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
    record.extend_from_slice(&iv);
    record.extend_from_slice(&tag);
    record.extend_from_slice(&ciphertext);
    Ok(record)
}

/// Decrypt a record produced by [`seal`].
pub fn open(key: &[u8; KEY_LEN], record: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if record.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::Truncated(record.len()));
    }

    let (iv, rest) = record.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let cipher = Aes256Gcm16::new_from_slice(key).map_err(|_| CryptoError::TagMismatch)?;
    let mut plaintext = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(iv),
            b"",
            &mut plaintext,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::TagMismatch)?;
    Ok(plaintext)
}
