//! Nostr sync events (NIP-01).
//!
//! The event id is the SHA-256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`, and `sig` is a BIP-340
//! signature over the 32 id bytes.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tether_crypto::{IdentityKeypair, PublicIdentity, PublicKey};

use crate::{Result, WireError};

/// Name of the single-valued tag scoping events to one slot.
pub const D_TAG: &str = "d";

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Event before id and signature are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Build an event carrying a single `["d", d_tag]` tag.
    pub fn new(
        pubkey: &PublicKey,
        kind: u16,
        d_tag: &str,
        content: String,
        created_at: u64,
    ) -> Self {
        Self {
            pubkey: pubkey.as_str().to_string(),
            created_at,
            kind,
            tags: vec![vec![D_TAG.to_string(), d_tag.to_string()]],
            content,
        }
    }

    /// NIP-01 event id.
    pub fn id(&self) -> [u8; 32] {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Attach the id and a signature from `keypair`.
    pub fn sign(self, keypair: &IdentityKeypair) -> Result<SyncEvent> {
        if keypair.public_key().as_str() != self.pubkey {
            return Err(WireError::Shape("pubkey does not match signing key".into()));
        }
        let id = self.id();
        let sig = keypair.sign_prehash(&id)?;
        Ok(SyncEvent {
            id: hex::encode(id),
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig),
        })
    }
}

fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> [u8; 32] {
    let canonical = json!([0, pubkey, created_at, kind, tags, content]).to_string();
    Sha256::digest(canonical.as_bytes()).into()
}

/// Signed event as published to a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl SyncEvent {
    /// Value of the first `d` tag.
    pub fn d_tag(&self) -> Option<&str> {
        d_tag_of(&self.tags)
    }

    /// Check that `id` matches the content and `sig` verifies under `pubkey`.
    pub fn verify(&self) -> Result<()> {
        let expected = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        let id = decode_fixed::<32>(&self.id).ok_or(WireError::InvalidSignature)?;
        if id != expected {
            return Err(WireError::InvalidSignature);
        }
        let sig = decode_fixed::<64>(&self.sig).ok_or(WireError::InvalidSignature)?;
        let author = PublicKey::parse(&self.pubkey).map_err(|_| WireError::InvalidSignature)?;
        let identity =
            PublicIdentity::from_public_key(&author).map_err(|_| WireError::InvalidSignature)?;
        if identity.verify_prehash(&id, &sig) {
            Ok(())
        } else {
            Err(WireError::InvalidSignature)
        }
    }
}

fn d_tag_of(tags: &[Vec<String>]) -> Option<&str> {
    tags.iter()
        .find(|t| t.first().map(String::as_str) == Some(D_TAG))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    hex::decode(s).ok()?.try_into().ok()
}

/// Event object as received from a relay.
///
/// Relays are untrusted, so only `content` is required; everything else is
/// checked when present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub kind: Option<u16>,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(default)]
    pub sig: Option<String>,
}

impl InboundEvent {
    /// Key for de-duplicating repeated deliveries.
    pub fn dedup_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.content)
    }

    pub fn d_tag(&self) -> Option<&str> {
        d_tag_of(&self.tags)
    }

    /// Convert to a fully-formed event, if every field is present.
    pub fn to_signed(&self) -> Option<SyncEvent> {
        Some(SyncEvent {
            id: self.id.clone()?,
            pubkey: self.pubkey.clone()?,
            created_at: self.created_at?,
            kind: self.kind?,
            tags: self.tags.clone(),
            content: self.content.clone(),
            sig: self.sig.clone()?,
        })
    }

    /// Full id and signature check. Incomplete events fail.
    pub fn verify(&self) -> Result<()> {
        self.to_signed()
            .ok_or_else(|| WireError::Shape("event is missing signed fields".into()))?
            .verify()
    }
}

impl From<SyncEvent> for InboundEvent {
    fn from(event: SyncEvent) -> Self {
        Self {
            id: Some(event.id),
            pubkey: Some(event.pubkey),
            created_at: Some(event.created_at),
            kind: Some(event.kind),
            tags: event.tags,
            content: event.content,
            sig: Some(event.sig),
        }
    }
}
