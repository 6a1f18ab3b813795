use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Identity seed supplied by the application.
///
/// Either a single token (an account email) or a compound identifier whose
/// parts are joined in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentitySeed {
    Single(String),
    Compound(Vec<String>),
}

impl IdentitySeed {
    /// The seed's parts in caller order.
    pub fn parts(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Compound(parts) => parts.iter().map(String::as_str).collect(),
        }
    }

    /// True when no part carries any content.
    pub fn is_blank(&self) -> bool {
        self.parts().iter().all(|p| p.is_empty())
    }
}

impl From<&str> for IdentitySeed {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

impl From<Vec<String>> for IdentitySeed {
    fn from(parts: Vec<String>) -> Self {
        Self::Compound(parts)
    }
}

impl<const N: usize> From<[&str; N]> for IdentitySeed {
    fn from(parts: [&str; N]) -> Self {
        Self::Compound(parts.iter().map(|p| p.to_string()).collect())
    }
}

/// Control message exchanged between a controller and the sync task.
///
/// Serialized as `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[allow(non_camel_case_types)]
pub enum ControlMessage {
    /// Derive the identity and start syncing.
    INIT {
        #[serde(rename = "identitySeed")]
        identity_seed: IdentitySeed,
    },

    /// Vault established; carries the hex x-only public key.
    READY {
        #[serde(rename = "publicKey")]
        public_key: String,
    },

    /// Publish a local fragment to the relay mesh.
    SYNC_OUT { data: Value },

    /// A remote fragment was received and decrypted.
    SYNC_RECEIVED { data: Value },

    /// Re-request the latest remote fragment.
    SYNC_IN,

    /// Fault reported to the controller.
    ERROR { message: String },
}

impl ControlMessage {
    /// Parse a message from JSON text and validate its payload.
    pub fn from_json(text: &str) -> Result<Self> {
        let msg: Self = serde_json::from_str(text)
            .map_err(|e| Error::validation(format!("malformed control message: {e}")))?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn to_json(&self) -> String {
        // Every variant holds only strings and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::ERROR {
            message: message.to_string(),
        }
    }

    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::INIT { .. } => "INIT",
            Self::READY { .. } => "READY",
            Self::SYNC_OUT { .. } => "SYNC_OUT",
            Self::SYNC_RECEIVED { .. } => "SYNC_RECEIVED",
            Self::SYNC_IN => "SYNC_IN",
            Self::ERROR { .. } => "ERROR",
        }
    }

    /// Whether a controller may send this message to the sync task.
    pub fn is_controller_request(&self) -> bool {
        matches!(
            self,
            Self::INIT { .. } | Self::SYNC_OUT { .. } | Self::SYNC_IN
        )
    }

    /// Check payload shape beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::INIT { identity_seed } => {
                if identity_seed.is_blank() {
                    return Err(Error::validation("Invalid INIT payload: empty identity seed"));
                }
            }
            Self::SYNC_OUT { data } | Self::SYNC_RECEIVED { data } => {
                validate_fragment(data).map_err(|reason| {
                    Error::validation(format!("Invalid {} payload: {reason}", self.type_name()))
                })?;
            }
            Self::READY { public_key } => {
                if public_key.is_empty() {
                    return Err(Error::validation("Invalid READY payload: empty public key"));
                }
            }
            Self::SYNC_IN | Self::ERROR { .. } => {}
        }
        Ok(())
    }
}

/// A fragment must be a non-empty JSON object at the top level.
pub fn validate_fragment(data: &Value) -> std::result::Result<(), &'static str> {
    match data.as_object() {
        Some(map) if !map.is_empty() => Ok(()),
        Some(_) => Err("fragment must not be empty"),
        None => Err("fragment must be an object"),
    }
}
