//! Message encryption for piheat-sync.
//!
//! Wire compatible with the deployed devices:
//! - key = SHA-256 of the UTF-8 passphrase
//! - AES-256-CBC with PKCS#7 padding, random 128-bit IV sent as `nonce`
//! - plaintext is compact JSON with non-ASCII escaped as `\uXXXX`
//!
//! CBC has no authentication. A wrong passphrase is detected by the padding
//! check or by the plaintext not being a JSON object.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use sync_types::{Envelope, Message, RawMessage};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size.
pub const KEY_SIZE: usize = 32;

/// AES block size, also the IV (nonce) size.
pub const NONCE_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Cipher errors.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Nonce or payload missing, not base64, or of the wrong size.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Ciphertext did not decrypt to a JSON object (possibly wrong passphrase).
    #[error("decryption failed: data is unreadable")]
    DecryptFailure,

    /// The message could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The OS random source failed.
    #[error("random source unavailable: {0}")]
    Rng(String),

    /// Key or IV of the wrong size.
    #[error("invalid key length")]
    InvalidKeyLength,
}

/// A 256-bit channel key derived from the shared passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// SHA-256 of the passphrase. Deterministic.
    pub fn derive(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key([REDACTED])")
    }
}

/// Encrypts and decrypts messages for one channel.
#[derive(Clone, Debug)]
pub struct Cipher {
    key: Key,
}

impl Cipher {
    /// Create a cipher from a key.
    pub fn new(key: Key) -> Self {
        Self { key }
    }

    /// Create a cipher from the shared passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(Key::derive(passphrase))
    }

    /// Encrypt a message under a fresh random nonce.
    pub fn encrypt(&self, message: &Message) -> Result<Envelope, CipherError> {
        let json =
            serde_json::to_string(message).map_err(|e| CipherError::Serialization(e.to_string()))?;
        self.encrypt_json(&json)
    }

    /// Encrypt an already serialized JSON document.
    pub fn encrypt_json(&self, json: &str) -> Result<Envelope, CipherError> {
        let mut iv = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut iv).map_err(|e| CipherError::Rng(e.to_string()))?;

        let plaintext = escape_non_ascii(json);
        let ciphertext = Aes256CbcEnc::new_from_slices(self.key.as_bytes(), &iv)
            .map_err(|_| CipherError::InvalidKeyLength)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(Envelope {
            nonce: STANDARD.encode(iv),
            payload: STANDARD.encode(ciphertext),
        })
    }

    /// Decrypt an envelope into an unvalidated JSON object.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<RawMessage, CipherError> {
        let iv = STANDARD
            .decode(&envelope.nonce)
            .map_err(|e| CipherError::MalformedEnvelope(format!("nonce: {e}")))?;
        if iv.len() != NONCE_SIZE {
            return Err(CipherError::MalformedEnvelope(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext = STANDARD
            .decode(&envelope.payload)
            .map_err(|e| CipherError::MalformedEnvelope(format!("payload: {e}")))?;
        if ciphertext.is_empty() || ciphertext.len() % NONCE_SIZE != 0 {
            return Err(CipherError::DecryptFailure);
        }

        let plaintext = Aes256CbcDec::new_from_slices(self.key.as_bytes(), &iv)
            .map_err(|_| CipherError::InvalidKeyLength)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::DecryptFailure)?;

        let text = String::from_utf8(plaintext).map_err(|_| CipherError::DecryptFailure)?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|_| CipherError::DecryptFailure)?;
        RawMessage::from_value(value).ok_or(CipherError::DecryptFailure)
    }
}

/// Replace every non-ASCII character with `\uXXXX` escapes of its UTF-16
/// code units. Only valid inside JSON strings, which is where serde_json
/// leaves non-ASCII text.
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
