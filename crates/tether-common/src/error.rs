//! Common error types for Tether.

use thiserror::Error;

/// Result type alias using Tether's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Tether operations.
///
/// Variants mirror how a failure is handled: configuration and key
/// derivation failures are fatal, relay-side failures are recovered locally,
/// and validation failures are reported to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or missing relay configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Seed hardening or keypair construction failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Socket-level failure talking to a relay
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound relay frame could not be parsed
    #[error("protocol parse error: {0}")]
    ProtocolParse(String),

    /// Ciphertext did not authenticate under the session key
    #[error("decryption failed")]
    Decryption,

    /// Control message payload was rejected
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a configuration error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a key derivation error from any displayable type.
    pub fn key_derivation(msg: impl std::fmt::Display) -> Self {
        Self::KeyDerivation(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a protocol parse error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::ProtocolParse(msg.to_string())
    }

    /// Create a validation error from any displayable type.
    pub fn validation(msg: impl std::fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Whether this error ends the current session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::KeyDerivation(_))
    }

    /// Whether this error came from the relay mesh and should be dropped
    /// rather than reported to the caller.
    pub fn is_mesh_noise(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ProtocolParse(_) | Self::Decryption
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::config("no relays").to_string(),
            "configuration error: no relays"
        );
        assert_eq!(Error::Decryption.to_string(), "decryption failed");
        assert_eq!(
            Error::validation("empty seed").to_string(),
            "validation error: empty seed"
        );
    }

    #[test]
    fn test_fatality_classes() {
        assert!(Error::key_derivation("bad scalar").is_session_fatal());
        assert!(Error::config("x").is_session_fatal());
        assert!(!Error::validation("x").is_session_fatal());

        assert!(Error::transport("reset").is_mesh_noise());
        assert!(Error::protocol("not json").is_mesh_noise());
        assert!(Error::Decryption.is_mesh_noise());
        assert!(!Error::validation("x").is_mesh_noise());
    }
}
