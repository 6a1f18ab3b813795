//! Tether sync client.
//!
//! [`ProtocolBridge`] is the background task owning one sync session: it
//! derives the identity, drives the [`RelayMeshClient`] and speaks
//! [`ControlMessage`](tether_common::ControlMessage)s with its controller.
//! [`SyncEngine`] is the controller most applications want: it starts the
//! bridge and mirrors fragments into a [`PreferenceStore`].

#![forbid(unsafe_code)]

pub mod bridge;
pub mod engine;
pub mod relay;
pub mod store;

pub use bridge::{BridgeHandle, ProtocolBridge};
pub use engine::{SyncEngine, PREFERENCES_DOC_ID};
pub use relay::{ConnectionState, MeshEvent, RelayMeshClient};
pub use store::{MemoryStore, PreferenceDoc, PreferenceStore};

use tether_core::WireError;
use tether_crypto::CryptoError;
use thiserror::Error;

/// Relay mesh errors.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("no relay endpoints configured")]
    NoRelays,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<MeshError> for tether_common::Error {
    fn from(err: MeshError) -> Self {
        match err {
            MeshError::NoRelays => tether_common::Error::config("no relay endpoints configured"),
            MeshError::Transport(msg) => tether_common::Error::Transport(msg),
            MeshError::Wire(e) => tether_common::Error::protocol(e),
            MeshError::Crypto(e) => tether_common::Error::validation(e),
        }
    }
}
