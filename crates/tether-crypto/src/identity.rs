//! secp256k1 Schnorr identity keys and public key ids.
//!
//! A **public key id** is the lowercase hex encoding of a BIP-340 x-only public
//! key (32 bytes → 64 characters), the `pubkey` field of a Nostr event.
//!
//! # Example
//!
//! ```
//! use tether_crypto::identity::IdentityKeypair;
//! use tether_crypto::seed::SeedDeriver;
//!
//! let seed = SeedDeriver::native().derive("user@example.com|prod-v1");
//! let keypair = IdentityKeypair::from_seed(&seed).unwrap();
//!
//! let digest = [7u8; 32];
//! let signature = keypair.sign_prehash(&digest).unwrap();
//! assert!(keypair.public_identity().verify_prehash(&digest, &signature));
//! ```

use std::fmt;

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use signature::hazmat::PrehashVerifier;
use zeroize::Zeroize;

use crate::seed::DerivedSeed;
use crate::{CryptoError, Result};

/// Hex-encoded x-only public key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(String);

impl PublicKey {
    /// Create from raw x-only public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Parse from hex, accepting either case.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidPublicKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the raw public key bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32]> {
        let bytes =
            hex::decode(&self.0).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey("invalid key length".into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.0)
    }
}

/// BIP-340 Schnorr signing keypair.
///
/// The private key is exactly the derived seed, so the same seed always
/// yields the same identity. BIP-340 signs with the seed or its negation,
/// whichever gives an even-y public point; `signing_key` holds that
/// normalized scalar and `secret` keeps the seed. Both zeroize on drop.
pub struct IdentityKeypair {
    secret: DerivedSeed,
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Use the derived seed directly as the private key.
    ///
    /// Fails if the seed is not a valid secp256k1 scalar (zero, or not below
    /// the group order).
    pub fn from_seed(seed: &DerivedSeed) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(seed.as_bytes())
            .map_err(|_| CryptoError::KeyDerivation("seed is not a valid secp256k1 scalar".into()))?;
        Ok(Self {
            secret: seed.clone(),
            signing_key,
        })
    }

    /// Get the public key id.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(&self.public_key_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes().into()
    }

    /// Verifying half of this keypair.
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity {
            verifying_key: self.signing_key.verifying_key().clone(),
        }
    }

    /// Get the private key bytes: the derived seed as given to
    /// [`IdentityKeypair::from_seed`], before any BIP-340 negation.
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the identity.
    pub fn private_key_bytes(&self) -> [u8; 32] {
        *self.secret.as_bytes()
    }

    /// Sign a 32-byte digest (a Nostr event id) with fresh auxiliary randomness.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<[u8; 64]> {
        let mut aux_rand = [0u8; 32];
        OsRng.fill_bytes(&mut aux_rand);
        let signature = self
            .signing_key
            .sign_prehash_with_aux_rand(digest, &aux_rand)
            .map_err(|e| CryptoError::Signing(e.to_string()));
        aux_rand.zeroize();
        Ok(signature?.to_bytes())
    }
}

/// Public identity (verifying key only).
///
/// Used to check events authored by a given pubkey.
#[derive(Clone)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
}

impl PublicIdentity {
    /// Create from raw x-only public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    pub fn from_public_key(public_key: &PublicKey) -> Result<Self> {
        Self::from_bytes(&public_key.to_bytes()?)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(&self.verifying_key.to_bytes().into())
    }

    /// Verify a signature over a 32-byte digest.
    pub fn verify_prehash(&self, digest: &[u8; 32], signature: &[u8; 64]) -> bool {
        let sig = match Signature::try_from(&signature[..]) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.verifying_key.verify_prehash(digest, &sig).is_ok()
    }
}
