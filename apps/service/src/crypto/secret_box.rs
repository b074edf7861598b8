//! Symmetric sealing of credentials with XChaCha20-Poly1305.
//!
//! A sealed blob is `base64(nonce || ciphertext)`, where the key is the SHA-256 of
//! an operator supplied passphrase.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, OsRng},
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("sealed secret is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("sealed secret is too short")]
    Truncated,

    #[error("failed to open secret (wrong key or tampered data)")]
    Decrypt,

    #[error("failed to seal secret")]
    Encrypt,

    #[error("no secret key configured (set {0})")]
    MissingKey(String),
}

/// Opens sealed credentials
pub trait SecretBox: Send + Sync {
    fn open(&self, sealed: &str) -> Result<Vec<u8>, SecretError>;
}

pub struct ChaChaSecretBox {
    cipher: XChaCha20Poly1305,
}

impl ChaChaSecretBox {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        Self { cipher: XChaCha20Poly1305::new(&key) }
    }

    /// Build from the passphrase stored in environment variable `var`
    pub fn from_env(var: &str) -> Result<Self, SecretError> {
        match std::env::var(var) {
            Ok(passphrase) if !passphrase.is_empty() => Ok(Self::from_passphrase(&passphrase)),
            _ => Err(SecretError::MissingKey(var.to_string())),
        }
    }

    /// Seal `plaintext` into a storable blob
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|_| SecretError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }
}

impl SecretBox for ChaChaSecretBox {
    fn open(&self, sealed: &str) -> Result<Vec<u8>, SecretError> {
        let blob = STANDARD.decode(sealed.trim())?;
        if blob.len() <= NONCE_LEN {
            return Err(SecretError::Truncated);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| SecretError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_secret_opens_with_same_passphrase() {
        let secrets = ChaChaSecretBox::from_passphrase("correct horse");
        let sealed = secrets.seal(b"123456:bot-token").unwrap();
        assert_ne!(sealed, "123456:bot-token");
        assert_eq!(secrets.open(&sealed).unwrap(), b"123456:bot-token");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = ChaChaSecretBox::from_passphrase("one").seal(b"token").unwrap();
        let other = ChaChaSecretBox::from_passphrase("two");
        assert!(matches!(other.open(&sealed), Err(SecretError::Decrypt)));
    }

    #[test]
    fn garbage_is_rejected() {
        let secrets = ChaChaSecretBox::from_passphrase("key");
        assert!(matches!(secrets.open("not base64!"), Err(SecretError::Decode(_))));
        assert!(matches!(secrets.open("AAAA"), Err(SecretError::Truncated)));
    }
}
