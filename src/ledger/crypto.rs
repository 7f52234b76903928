//! Encrypted integer fields.
//!
//! Every balance column passes through [`LedgerCipher`]: an `i64` is sealed
//! with XChaCha20-Poly1305 under a key derived from the process-wide secret
//! and stored as `base64(nonce || ciphertext)`.
//!
//! Decryption has a single failure mode, [`CryptoError`], and callers must
//! treat it as data corruption. A value is never defaulted to zero.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// XChaCha20-Poly1305 nonce size (24 bytes)
const NONCE_SIZE: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),

    #[error("authentication failed (wrong key or corrupt ciphertext)")]
    Authentication,

    #[error("plaintext has unexpected length {0}")]
    Plaintext(usize),

    #[error("encryption failed")]
    Encrypt,
}

/// Symmetric cipher for ledger amounts.
#[derive(Clone)]
pub struct LedgerCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for LedgerCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerCipher").finish_non_exhaustive()
    }
}

impl LedgerCipher {
    pub fn new(secret: &SecretString) -> Self {
        let digest = Sha256::digest(secret.expose_secret().as_bytes());
        let key = Key::from_slice(&digest);
        Self {
            cipher: XChaCha20Poly1305::new(key),
        }
    }

    pub fn encrypt(&self, value: i64) -> Result<String, CryptoError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, value.to_le_bytes().as_slice())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<i64, CryptoError> {
        let sealed = STANDARD.decode(encoded.trim())?;
        if sealed.len() <= NONCE_SIZE {
            return Err(CryptoError::Truncated(sealed.len()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Authentication)?;

        let bytes: [u8; 8] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Plaintext(plaintext.len()))?;
        Ok(i64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(secret: &str) -> LedgerCipher {
        LedgerCipher::new(&SecretString::from(secret.to_string()))
    }

    #[test]
    fn test_encrypt_decrypt() {
        let c = cipher("key");
        for value in [0, 1, -1, i64::MAX, i64::MIN, 42_000_000] {
            let sealed = c.encrypt(value).unwrap();
            assert_eq!(c.decrypt(&sealed).unwrap(), value);
        }
    }

    #[test]
    fn test_nonce_is_fresh() {
        let c = cipher("key");
        assert_ne!(c.encrypt(7).unwrap(), c.encrypt(7).unwrap());
    }

    #[test]
    fn test_wrong_key_is_an_error() {
        let sealed = cipher("key-a").encrypt(100).unwrap();
        assert!(matches!(
            cipher("key-b").decrypt(&sealed),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_corrupt_ciphertext_is_an_error() {
        let c = cipher("key");
        assert!(matches!(c.decrypt("not base64!"), Err(CryptoError::Encoding(_))));
        assert!(matches!(c.decrypt("AAAA"), Err(CryptoError::Truncated(3))));

        let mut sealed = STANDARD.decode(c.encrypt(5).unwrap()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            c.decrypt(&STANDARD.encode(sealed)),
            Err(CryptoError::Authentication)
        ));
    }
}
