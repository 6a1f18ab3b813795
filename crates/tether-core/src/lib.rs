#![forbid(unsafe_code)]

//! Tether wire types.
//!
//! Preferences travel as Nostr events: this crate defines the event model
//! (id hashing, signing, verification) and the JSON array frames exchanged
//! with relays. It performs no I/O.

pub mod event;
pub mod frame;

pub use event::{unix_now, InboundEvent, SyncEvent, UnsignedEvent, D_TAG};
pub use frame::{ClientFrame, Filter, RelayFrame};

use tether_crypto::CryptoError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("malformed frame: {0}")]
    Shape(String),

    #[error("unknown frame type: {0}")]
    UnknownFrame(String),

    #[error("event id or signature does not verify")]
    InvalidSignature,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
