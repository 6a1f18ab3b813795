//! AES-256-GCM payload encryption.
//!
//! Blobs are framed as `nonce(12) || ciphertext || tag(16)` and base64-encoded
//! (standard alphabet, padded) for the text-only relay channel.
//!
//! Decryption never fails loudly: relays are public and may replay garbage or
//! events encrypted for another identity, so every failure collapses to
//! `None` and the caller drops the event.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// 256-bit AEAD key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Authenticated encryption under a single session key.
pub struct CipherBox<'a> {
    key: &'a SymmetricKey,
}

impl<'a> CipherBox<'a> {
    pub fn new(key: &'a SymmetricKey) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()))
    }

    /// Encrypt with a fresh random nonce and return the base64 blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(framed))
    }

    /// Decrypt a base64 blob, or `None` if it is malformed or does not
    /// authenticate under this key.
    pub fn decrypt(&self, blob: &str) -> Option<Vec<u8>> {
        let framed = STANDARD.decode(blob.trim()).ok()?;
        if framed.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()
    }

    /// Encrypt a JSON value as its compact text form.
    pub fn encrypt_json(&self, value: &Value) -> Result<String> {
        let text =
            serde_json::to_vec(value).map_err(|e| CryptoError::Encryption(e.to_string()))?;
        self.encrypt(&text)
    }

    /// Decrypt a blob holding JSON text. Non-JSON plaintext is also `None`.
    pub fn decrypt_json(&self, blob: &str) -> Option<Value> {
        let plaintext = self.decrypt(blob)?;
        serde_json::from_slice(&plaintext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_roundtrip() {
        let k = key(1);
        let cipher = CipherBox::new(&k);
        let large = vec![0u8; 4096];
        let cases: [&[u8]; 4] = [b"", b"x", br#"{"theme":"dark"}"#, &large];
        for plaintext in cases {
            let blob = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_framing() {
        let k = key(1);
        let blob = CipherBox::new(&k).encrypt(b"hello").unwrap();
        let framed = STANDARD.decode(&blob).unwrap();
        assert_eq!(framed.len(), NONCE_LEN + 5 + TAG_LEN);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let k = key(1);
        let cipher = CipherBox::new(&k);
        assert_ne!(cipher.encrypt(b"same").unwrap(), cipher.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_every_flipped_byte_is_rejected() {
        let k = key(1);
        let cipher = CipherBox::new(&k);
        let framed = STANDARD.decode(cipher.encrypt(b"{\"a\":1}").unwrap()).unwrap();
        for i in 0..framed.len() {
            let mut tampered = framed.clone();
            tampered[i] ^= 0x01;
            assert!(cipher.decrypt(&STANDARD.encode(&tampered)).is_none(), "byte {i}");
        }
    }

    #[test]
    fn test_wrong_key_rejected() {
        let k1 = key(1);
        let k2 = key(2);
        let blob = CipherBox::new(&k1).encrypt(b"secret").unwrap();
        assert!(CipherBox::new(&k2).decrypt(&blob).is_none());
    }

    #[test]
    fn test_malformed_blobs() {
        let k = key(1);
        let cipher = CipherBox::new(&k);
        assert!(cipher.decrypt("not-base64").is_none());
        assert!(cipher.decrypt("").is_none());
        assert!(cipher.decrypt(&STANDARD.encode([0u8; 27])).is_none());
    }

    #[test]
    fn test_json_helpers() {
        let k = key(3);
        let cipher = CipherBox::new(&k);
        let blob = cipher.encrypt_json(&json!({"theme": "dark"})).unwrap();
        assert_eq!(cipher.decrypt_json(&blob).unwrap(), json!({"theme": "dark"}));

        let not_json = cipher.encrypt(b"\xff\xfe").unwrap();
        assert!(cipher.decrypt_json(&not_json).is_none());
    }
}
