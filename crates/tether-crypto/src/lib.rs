//! Cryptographic primitives for Tether.
//!
//! This crate provides:
//! - Identity seed derivation with a native engine and a SHA-256 fallback
//! - PBKDF2 key hardening into a session [`KeyVault`]
//! - AES-256-GCM payload encryption via [`CipherBox`]
//! - BIP-340 Schnorr identity keys (the Nostr signing scheme)
//!
//! # Design
//!
//! The identity is fully determined by the seed: the signing key *is* the
//! derived seed, and the AEAD key is a stretched function of it. Nothing here
//! is persisted; the vault zeroizes its secrets on drop.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod identity;
pub mod seed;
pub mod vault;

pub use cipher::{CipherBox, SymmetricKey};
pub use identity::{IdentityKeypair, PublicIdentity, PublicKey};
pub use seed::{
    normalize_seed, DerivedSeed, EngineError, HashFallbackEngine, NativeEngine, SeedDeriver,
    SeedEngine,
};
pub use vault::{KeyVault, PBKDF2_ITERATIONS};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}
