//! Identity seed derivation.
//!
//! A [`SeedDeriver`] turns a normalized identity seed into a stable 32-byte
//! secret. It prefers the [`NativeEngine`] (HMAC-SHA256 keyed with a baked-in
//! constant) and falls back to [`HashFallbackEngine`] (plain SHA-256) when the
//! native engine cannot be loaded or fails to run.
//!
//! The two engines do not produce the same bytes for the same seed. Switching
//! engines therefore changes the identity, which is why fallback is logged as
//! a degraded-mode event.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Separator joining compound seed parts.
pub const SEED_SEPARATOR: &str = "|";

/// Length of a derived seed in bytes.
pub const DERIVED_SEED_LEN: usize = 32;

// Kept as byte codes so the constant does not appear as a plain string.
const NATIVE_SALT: [u8; 18] = [
    80, 108, 97, 116, 102, 111, 114, 109, 83, 101, 99, 114, 101, 116, 50, 48, 50, 54,
];

type HmacSha256 = Hmac<Sha256>;

/// Seed engine errors.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine failed to load: {0}")]
    Load(String),

    #[error("engine failed to execute: {0}")]
    Execute(String),
}

/// Join seed parts in order with [`SEED_SEPARATOR`].
pub fn normalize_seed<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(SEED_SEPARATOR)
}

/// 32-byte secret derived from a normalized seed. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedSeed([u8; DERIVED_SEED_LEN]);

impl DerivedSeed {
    pub fn from_bytes(bytes: [u8; DERIVED_SEED_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DERIVED_SEED_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedSeed(..)")
    }
}

/// A pluggable seed derivation routine.
pub trait SeedEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Derive 32 bytes from the normalized seed.
    fn derive(&self, normalized_seed: &str) -> Result<[u8; DERIVED_SEED_LEN], EngineError>;
}

/// Dedicated derivation routine: HMAC-SHA256 keyed with an internal constant.
///
/// The keyed state is built once and cloned for each derivation.
pub struct NativeEngine {
    keyed: HmacSha256,
}

static NATIVE_ENGINE: OnceCell<Result<Arc<NativeEngine>, EngineError>> = OnceCell::new();

impl NativeEngine {
    /// Instantiate the engine. Prefer [`NativeEngine::shared`].
    pub fn load() -> Result<Self, EngineError> {
        let keyed =
            HmacSha256::new_from_slice(&NATIVE_SALT).map_err(|e| EngineError::Load(e.to_string()))?;
        Ok(Self { keyed })
    }

    /// The process-wide engine, instantiated on first use.
    ///
    /// A load failure is cached as well, so callers fall back without
    /// retrying the load on every session.
    pub fn shared() -> Result<Arc<NativeEngine>, EngineError> {
        NATIVE_ENGINE
            .get_or_init(|| {
                debug!("instantiating native seed engine");
                Self::load().map(Arc::new)
            })
            .clone()
    }
}

impl SeedEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn derive(&self, normalized_seed: &str) -> Result<[u8; DERIVED_SEED_LEN], EngineError> {
        let mut mac = self.keyed.clone();
        mac.update(normalized_seed.as_bytes());
        Ok(mac.finalize().into_bytes().into())
    }
}

/// Fallback routine: SHA-256 of the normalized seed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashFallbackEngine;

impl HashFallbackEngine {
    pub fn digest(&self, normalized_seed: &str) -> [u8; DERIVED_SEED_LEN] {
        Sha256::digest(normalized_seed.as_bytes()).into()
    }
}

impl SeedEngine for HashFallbackEngine {
    fn name(&self) -> &'static str {
        "sha256-fallback"
    }

    fn derive(&self, normalized_seed: &str) -> Result<[u8; DERIVED_SEED_LEN], EngineError> {
        Ok(self.digest(normalized_seed))
    }
}

/// Derives identity seeds, falling back to [`HashFallbackEngine`] when the
/// primary engine is unavailable or fails.
#[derive(Clone)]
pub struct SeedDeriver {
    primary: Option<Arc<dyn SeedEngine>>,
    fallback: HashFallbackEngine,
}

impl SeedDeriver {
    /// Use the shared [`NativeEngine`], or the fallback if it fails to load.
    pub fn native() -> Self {
        Self::load(|| NativeEngine::shared().map(|e| e as Arc<dyn SeedEngine>))
    }

    /// Always use the hash fallback.
    pub fn hash_only() -> Self {
        Self {
            primary: None,
            fallback: HashFallbackEngine,
        }
    }

    /// Use a specific primary engine.
    pub fn with_engine(engine: Arc<dyn SeedEngine>) -> Self {
        Self {
            primary: Some(engine),
            fallback: HashFallbackEngine,
        }
    }

    /// Load a primary engine with `loader`, degrading to the fallback on error.
    pub fn load<F>(loader: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn SeedEngine>, EngineError>,
    {
        match loader() {
            Ok(engine) => Self::with_engine(engine),
            Err(e) => {
                warn!("seed engine unavailable, using SHA-256 fallback: {}", e);
                Self::hash_only()
            }
        }
    }

    /// Name of the engine tried first.
    pub fn engine_name(&self) -> &'static str {
        self.primary
            .as_ref()
            .map_or(self.fallback.name(), |e| e.name())
    }

    /// Derive the seed. Never fails.
    pub fn derive(&self, normalized_seed: &str) -> DerivedSeed {
        if let Some(engine) = &self.primary {
            match engine.derive(normalized_seed) {
                Ok(bytes) => return DerivedSeed(bytes),
                Err(e) => {
                    warn!(
                        "seed engine {} failed, using SHA-256 fallback: {}",
                        engine.name(),
                        e
                    );
                }
            }
        }
        DerivedSeed(self.fallback.digest(normalized_seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenEngine;

    impl SeedEngine for BrokenEngine {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn derive(&self, _: &str) -> Result<[u8; DERIVED_SEED_LEN], EngineError> {
            Err(EngineError::Execute("trap".into()))
        }
    }

    #[test]
    fn test_normalize_joins_in_order() {
        assert_eq!(normalize_seed(&["u1", "app"]), "u1|app");
        assert_eq!(normalize_seed(&["solo"]), "solo");
        assert_ne!(normalize_seed(&["a", "b"]), normalize_seed(&["b", "a"]));
    }

    #[test]
    fn test_native_deterministic() {
        let a = SeedDeriver::native().derive("u1|app");
        let b = SeedDeriver::native().derive("u1|app");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), DERIVED_SEED_LEN);
    }

    #[test]
    fn test_fallback_deterministic() {
        let deriver = SeedDeriver::hash_only();
        assert_eq!(deriver.derive("u1|app"), deriver.derive("u1|app"));
        assert_eq!(deriver.engine_name(), "sha256-fallback");
    }

    #[test]
    fn test_engines_are_independent() {
        let native = SeedDeriver::native().derive("u1|app");
        let hashed = SeedDeriver::hash_only().derive("u1|app");
        assert_ne!(native, hashed);
    }

    #[test]
    fn test_fallback_matches_plain_sha256() {
        let seed = SeedDeriver::hash_only().derive("user@example.com");
        let expected: [u8; 32] = Sha256::digest(b"user@example.com").into();
        assert_eq!(seed.as_bytes(), &expected);
    }

    #[test]
    fn test_execution_failure_falls_back() {
        let deriver = SeedDeriver::with_engine(Arc::new(BrokenEngine));
        let seed = deriver.derive("u1|app");
        assert_eq!(seed, SeedDeriver::hash_only().derive("u1|app"));
    }

    #[test]
    fn test_load_failure_falls_back() {
        let deriver = SeedDeriver::load(|| Err(EngineError::Load("no module".into())));
        assert_eq!(deriver.engine_name(), "sha256-fallback");
        assert_eq!(
            deriver.derive("u1|app"),
            SeedDeriver::hash_only().derive("u1|app")
        );
    }

    #[test]
    fn test_shared_engine_is_cached() {
        let a = NativeEngine::shared().unwrap();
        let b = NativeEngine::shared().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let seed = SeedDeriver::native().derive("secret");
        assert_eq!(format!("{seed:?}"), "DerivedSeed(..)");
    }
}
