//! Session key vault.
//!
//! [`KeyVault::harden`] turns a derived seed into the two secrets a session
//! needs: an AES-256-GCM key stretched with PBKDF2-HMAC-SHA256, and the
//! Schnorr identity keypair. The vault owns both for the life of the session
//! and zeroizes them when dropped.

use hmac::Hmac;
use sha2::Sha256;
use tracing::debug;

use crate::cipher::{CipherBox, SymmetricKey};
use crate::identity::{IdentityKeypair, PublicKey};
use crate::seed::DerivedSeed;
use crate::{CryptoError, Result};

/// PBKDF2 iteration count for the symmetric key.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive a 256-bit key from `seed` and `salt` with PBKDF2-HMAC-SHA256.
pub fn stretch_key(seed: &DerivedSeed, salt: &[u8], iterations: u32) -> Result<SymmetricKey> {
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivation("platform salt is empty".into()));
    }
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count is zero".into()));
    }

    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(seed.as_bytes(), salt, iterations, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let key = SymmetricKey::from_bytes(output);
    zeroize::Zeroize::zeroize(&mut output);
    Ok(key)
}

/// Session secrets: the AEAD key and the signing identity.
pub struct KeyVault {
    key: SymmetricKey,
    keypair: IdentityKeypair,
}

impl KeyVault {
    /// Harden a derived seed with the platform salt.
    ///
    /// This runs [`PBKDF2_ITERATIONS`] rounds and takes tens of milliseconds;
    /// call it off the async executor.
    pub fn harden(seed: &DerivedSeed, platform_salt: &str) -> Result<Self> {
        Self::harden_with_iterations(seed, platform_salt, PBKDF2_ITERATIONS)
    }

    /// [`KeyVault::harden`] with an explicit iteration count.
    pub fn harden_with_iterations(
        seed: &DerivedSeed,
        platform_salt: &str,
        iterations: u32,
    ) -> Result<Self> {
        let key = stretch_key(seed, platform_salt.as_bytes(), iterations)?;
        let keypair = IdentityKeypair::from_seed(seed)?;
        debug!("vault ready for {}", keypair.public_key());
        Ok(Self { key, keypair })
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &IdentityKeypair {
        &self.keypair
    }

    /// Cipher bound to this vault's key.
    pub fn cipher(&self) -> CipherBox<'_> {
        CipherBox::new(&self.key)
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedDeriver;

    const SALT: &str = "tether-platform-salt";

    #[test]
    fn test_stretch_deterministic() {
        let seed = SeedDeriver::native().derive("u1|app");
        let a = stretch_key(&seed, SALT.as_bytes(), 1000).unwrap();
        let b = stretch_key(&seed, SALT.as_bytes(), 1000).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_stretch_depends_on_salt() {
        let seed = SeedDeriver::native().derive("u1|app");
        let a = stretch_key(&seed, b"salt-a", 1000).unwrap();
        let b = stretch_key(&seed, b"salt-b", 1000).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_key_differs_from_seed() {
        let seed = SeedDeriver::native().derive("u1|app");
        let key = stretch_key(&seed, SALT.as_bytes(), 1000).unwrap();
        assert_ne!(key.as_bytes(), seed.as_bytes());
    }

    #[test]
    fn test_empty_salt_rejected() {
        let seed = SeedDeriver::native().derive("u1|app");
        let err = KeyVault::harden(&seed, "").unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn test_invalid_scalar_rejected() {
        let seed = DerivedSeed::from_bytes([0u8; 32]);
        assert!(KeyVault::harden_with_iterations(&seed, SALT, 1000).is_err());
    }

    #[test]
    fn test_full_iteration_count() {
        let seed = SeedDeriver::native().derive("u1|app");
        let vault = KeyVault::harden(&seed, SALT).unwrap();
        let reference = KeyVault::harden(&seed, SALT).unwrap();

        let blob = vault.cipher().encrypt(b"fragment").unwrap();
        assert_eq!(reference.cipher().decrypt(&blob).unwrap(), b"fragment");
        assert_eq!(vault.public_key(), reference.public_key());
    }

    #[test]
    fn test_debug_omits_secrets() {
        let seed = SeedDeriver::native().derive("u1|app");
        let vault = KeyVault::harden_with_iterations(&seed, SALT, 1000).unwrap();
        let rendered = format!("{vault:?}");
        assert!(rendered.contains(vault.public_key().as_str()));
        assert!(!rendered.contains(&hex::encode(seed.as_bytes())));
    }
}
