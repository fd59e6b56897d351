use crate::{ProtocolError, Result};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{AeadCore, Key, KeyInit, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};

/// Symmetric key length in bytes
pub const KEY_SIZE: usize = 32;

/// XChaCha20 nonce length in bytes, prepended to every sealed payload
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag length in bytes
pub const TAG_SIZE: usize = 16;

/// Pre-shared symmetric key for one session.
///
/// Read-only after session establishment; key rotation means opening a new
/// session, never swapping the key of a live one.
#[derive(Clone)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a hex-encoded 32-byte key.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|_| ProtocolError::InvalidKey("must be hex-encoded".to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            ProtocolError::InvalidKey(format!("must decode to {} bytes", KEY_SIZE))
        })?;
        Ok(Self(bytes))
    }

    /// Derives a key from a passphrase via SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Encrypts and authenticates `plaintext` under `key`.
///
/// A fresh random nonce is generated per call and prepended to the
/// ciphertext, so [`open`] needs only the key.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(rand::thread_rng());

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| ProtocolError::Crypto("encryption failure"))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Verifies and decrypts a payload produced by [`seal`].
///
/// A wrong or rotated key, a truncated payload, or any tampered byte yields
/// [`ProtocolError::AuthenticationFailed`]; this is an expected runtime
/// condition, not a crash.
pub fn open(key: &SessionKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(ProtocolError::AuthenticationFailed);
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::AuthenticationFailed)
}
