//! Sync configuration.
//!
//! Loaded from a JSON file whose keys match the web reference client's
//! `config.json` (`relays`, `platformSalt`, `nostrKind`, `defaultDTag`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{Error, Result};

/// Default delay before reconnecting to the next relay.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Floor for the relay handshake time limit.
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 100;

/// Default capacity of the controller <-> bridge channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Which seed derivation engine to prefer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedEngineKind {
    /// Dedicated keyed derivation routine, with hash fallback on failure.
    #[default]
    Native,
    /// Always use the plain hash fallback.
    Hash,
}

/// Configuration consumed by the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Ordered relay endpoints (`ws://` or `wss://`).
    pub relays: Vec<String>,
    /// Salt for PBKDF2 key stretching.
    pub platform_salt: String,
    /// Nostr event kind used for published fragments.
    pub nostr_kind: u16,
    /// Value of the single `d` tag scoping this application's events.
    pub default_d_tag: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Time limit for one relay handshake. Defaults to the reconnect delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub seed_engine: SeedEngineKind,
    /// Drop inbound events whose id or signature does not verify.
    #[serde(default)]
    pub verify_signatures: bool,
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl SyncConfig {
    /// Build a config with default tuning values.
    pub fn new(
        relays: Vec<String>,
        platform_salt: impl Into<String>,
        nostr_kind: u16,
        default_d_tag: impl Into<String>,
    ) -> Self {
        Self {
            relays,
            platform_salt: platform_salt.into(),
            nostr_kind,
            default_d_tag: default_d_tag.into(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_ms: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            seed_engine: SeedEngineKind::default(),
            verify_signatures: false,
        }
    }

    /// Parse and validate a config from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_json_str(&text)?;
        debug!(
            "loaded config from {} with {} relays",
            path.display(),
            config.relays.len()
        );
        Ok(config)
    }

    /// Check the invariants the core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.relays.is_empty() {
            return Err(Error::config("at least one relay is required"));
        }
        for relay in &self.relays {
            let url =
                Url::parse(relay).map_err(|e| Error::config(format!("relay {relay:?}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(Error::config(format!(
                    "relay {relay:?}: expected ws:// or wss:// scheme"
                )));
            }
        }
        if self.platform_salt.is_empty() {
            return Err(Error::config("platformSalt must not be empty"));
        }
        if self.default_d_tag.is_empty() {
            return Err(Error::config("defaultDTag must not be empty"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::config("channelCapacity must be at least 1"));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(Error::config("connectTimeoutMs must be positive"));
        }
        if self.reconnect_delay_ms == 0 {
            warn!("reconnectDelayMs is 0, failed relays are retried without pause");
        }
        if !self.verify_signatures {
            debug!("inbound event signatures are not verified");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// How long one relay handshake may take before the relay counts as failed.
    pub fn connect_timeout(&self) -> Duration {
        let ms = self
            .connect_timeout_ms
            .unwrap_or(self.reconnect_delay_ms)
            .max(MIN_CONNECT_TIMEOUT_MS);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "relays": ["wss://relay.damus.io", "wss://nos.lol"],
        "platformSalt": "tether-platform-salt",
        "nostrKind": 30078,
        "defaultDTag": "app_preferences"
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = SyncConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.nostr_kind, 30078);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.seed_engine, SeedEngineKind::Native);
        assert!(!config.verify_signatures);
    }

    #[test]
    fn test_optional_keys() {
        let text = r#"{
            "relays": ["ws://127.0.0.1:7000"],
            "platformSalt": "s",
            "nostrKind": 1,
            "defaultDTag": "d",
            "reconnectDelayMs": 50,
            "connectTimeoutMs": 750,
            "seedEngine": "hash",
            "verifySignatures": true
        }"#;
        let config = SyncConfig::from_json_str(text).unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(50));
        assert_eq!(config.connect_timeout(), Duration::from_millis(750));
        assert_eq!(config.seed_engine, SeedEngineKind::Hash);
        assert!(config.verify_signatures);
    }

    #[test]
    fn test_rejects_empty_relays() {
        let config = SyncConfig::new(vec![], "salt", 30078, "tag");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_non_websocket_relay() {
        let config = SyncConfig::new(vec!["https://relay.example".into()], "salt", 30078, "tag");
        assert!(config.validate().is_err());

        let config = SyncConfig::new(vec!["not a url".into()], "salt", 30078, "tag");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_fields() {
        let err = SyncConfig::from_json_str(r#"{"relays": ["wss://a"]}"#).unwrap_err();
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_connect_timeout_follows_reconnect_delay() {
        let mut config = SyncConfig::new(vec!["ws://a.example".into()], "salt", 30078, "tag");
        config.reconnect_delay_ms = 2_000;
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));

        config.reconnect_delay_ms = 0;
        assert_eq!(
            config.connect_timeout(),
            Duration::from_millis(MIN_CONNECT_TIMEOUT_MS)
        );
        assert!(config.validate().is_ok());

        config.connect_timeout_ms = Some(0);
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn test_rejects_empty_salt() {
        let config = SyncConfig::new(vec!["wss://a.example".into()], "", 30078, "tag");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.default_d_tag, "app_preferences");
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfig::load("/nonexistent/tether.json").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
