//! Relay mesh client.
//!
//! Holds a single websocket to one relay out of an ordered list. Any close,
//! error or handshake timeout advances to the next relay and reconnects after
//! a fixed delay.
//! Relays are untrusted: every inbound frame is parsed, filtered and
//! decrypted here, and anything that does not check out is dropped.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tether_common::{validate_fragment, SyncConfig};
use tether_core::{unix_now, ClientFrame, Filter, InboundEvent, RelayFrame, UnsignedEvent};
use tether_crypto::KeyVault;
use tokio::net::TcpStream;
use tokio::time::error::Elapsed;
use tokio::time::{sleep_until, timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::MeshError;

/// Inbound event ids remembered for de-duplication.
const SEEN_CAPACITY: usize = 4096;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake =
    Pin<Box<dyn Future<Output = Result<Result<WsStream, tungstenite::Error>, Elapsed>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// What happened on the mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// Handshake finished and the subscription request was sent.
    Connected { endpoint: String },
    /// The link dropped. A reconnect to `next_index` is scheduled.
    Disconnected { endpoint: String, next_index: usize },
    /// A decrypted fragment from our own identity.
    Fragment(Value),
}

enum Link {
    Idle { retry_at: Option<Instant> },
    Connecting(Handshake),
    Connected(WsStream),
}

enum Step {
    Retry,
    Open(WsStream),
    Lost(String),
    Text(String),
}

struct SeenEvents {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl SeenEvents {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        if self.keys.insert(key.clone()) {
            self.order.push_back(key);
        }
        while self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }
}

pub struct RelayMeshClient {
    endpoints: Vec<String>,
    current_index: usize,
    link: Link,
    vault: KeyVault,
    filter: Filter,
    kind: u16,
    d_tag: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    verify_signatures: bool,
    subscriptions: HashSet<String>,
    seen: SeenEvents,
    newest_created_at: Option<u64>,
}

impl RelayMeshClient {
    /// Create a disconnected client for `vault`'s identity.
    pub fn new(config: &SyncConfig, vault: KeyVault) -> Result<Self, MeshError> {
        if config.relays.is_empty() {
            return Err(MeshError::NoRelays);
        }
        let public_key = vault.public_key();
        Ok(Self {
            endpoints: config.relays.clone(),
            current_index: 0,
            link: Link::Idle { retry_at: None },
            filter: Filter::new(
                config.nostr_kind,
                public_key.as_str(),
                &config.default_d_tag,
            ),
            vault,
            kind: config.nostr_kind,
            d_tag: config.default_d_tag.clone(),
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
            verify_signatures: config.verify_signatures,
            subscriptions: HashSet::new(),
            seen: SeenEvents::new(),
            newest_created_at: None,
        })
    }

    pub fn state(&self) -> ConnectionState {
        match self.link {
            Link::Idle { .. } => ConnectionState::Disconnected,
            Link::Connecting(_) => ConnectionState::Connecting,
            Link::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_endpoint(&self) -> &str {
        &self.endpoints[self.current_index]
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Start the handshake with the current relay. The subscription request
    /// goes out as part of the handshake, so it is sent exactly once per
    /// connection. A handshake that outlives the connect timeout fails the
    /// relay like any other error.
    pub fn connect(&mut self) {
        if !matches!(self.link, Link::Idle { .. }) {
            debug!("connect ignored, link is {}", self.state());
            return;
        }

        let endpoint = self.current_endpoint().to_string();
        let request = match self.subscribe_frame() {
            Ok((subscription_id, frame)) => {
                self.subscriptions.insert(subscription_id);
                Some(frame)
            }
            Err(e) => {
                warn!("cannot build subscription request: {}", e);
                None
            }
        };

        info!("connecting to relay {}", endpoint);
        let handshake = async move {
            let (mut ws, _) = connect_async(endpoint.as_str()).await?;
            if let Some(frame) = request {
                ws.send(Message::Text(frame.into())).await?;
            }
            Ok::<_, tungstenite::Error>(ws)
        };
        self.link = Link::Connecting(Box::pin(timeout(self.connect_timeout, handshake)));
    }

    /// Drive the connection until something worth reporting happens.
    ///
    /// Cancel-safe: all progress lives in `self`, so this can sit in a
    /// `tokio::select!` branch. Pending forever while idle with no retry
    /// scheduled.
    pub async fn next_event(&mut self) -> MeshEvent {
        loop {
            let step = match &mut self.link {
                Link::Idle {
                    retry_at: Some(at),
                } => {
                    sleep_until(*at).await;
                    Step::Retry
                }
                Link::Idle { retry_at: None } => std::future::pending::<Step>().await,
                Link::Connecting(handshake) => match handshake.await {
                    Ok(Ok(ws)) => Step::Open(ws),
                    Ok(Err(e)) => Step::Lost(e.to_string()),
                    Err(_) => Step::Lost(format!(
                        "handshake timed out after {:?}",
                        self.connect_timeout
                    )),
                },
                Link::Connected(ws) => match ws.next().await {
                    Some(Ok(Message::Text(text))) => Step::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Close(_))) | None => Step::Lost("connection closed".into()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Step::Lost(e.to_string()),
                },
            };

            match step {
                Step::Retry => {
                    self.link = Link::Idle { retry_at: None };
                    self.connect();
                }
                Step::Open(ws) => {
                    self.link = Link::Connected(ws);
                    let endpoint = self.current_endpoint().to_string();
                    info!("connected to relay {}", endpoint);
                    return MeshEvent::Connected { endpoint };
                }
                Step::Lost(reason) => return self.fail(&reason),
                Step::Text(text) => {
                    if let Some(fragment) = self.handle_text(&text) {
                        return MeshEvent::Fragment(fragment);
                    }
                }
            }
        }
    }

    fn fail(&mut self, reason: &str) -> MeshEvent {
        let endpoint = self.current_endpoint().to_string();
        self.current_index = (self.current_index + 1) % self.endpoints.len();
        self.subscriptions.clear();
        self.link = Link::Idle {
            retry_at: Some(Instant::now() + self.reconnect_delay),
        };
        warn!(
            "relay {} unavailable ({}), failing over to {} in {:?}",
            endpoint,
            reason,
            self.current_endpoint(),
            self.reconnect_delay
        );
        MeshEvent::Disconnected {
            endpoint,
            next_index: self.current_index,
        }
    }

    /// Encrypt, sign and send a fragment. Dropped with a warning unless
    /// connected.
    pub async fn publish(&mut self, fragment: &Value) -> Result<(), MeshError> {
        if self.state() != ConnectionState::Connected {
            warn!("publish dropped, relay link is {}", self.state());
            return Ok(());
        }

        let content = self.vault.cipher().encrypt_json(fragment)?;
        let event = UnsignedEvent::new(
            &self.vault.public_key(),
            self.kind,
            &self.d_tag,
            content,
            unix_now(),
        )
        .sign(self.vault.keypair())?;
        let event_id = event.id.clone();
        let frame = ClientFrame::Event(event).to_json()?;

        self.send_text(frame).await?;
        debug!("published event {}", event_id);
        Ok(())
    }

    /// Send a fresh subscription request under a new subscription id, then
    /// close the ones it replaces. At most one subscription stays open.
    pub async fn subscribe(&mut self) -> Result<(), MeshError> {
        if self.state() != ConnectionState::Connected {
            warn!("subscribe dropped, relay link is {}", self.state());
            return Ok(());
        }

        let (subscription_id, frame) = self.subscribe_frame()?;
        self.send_text(frame).await?;
        let previous = std::mem::take(&mut self.subscriptions);
        self.subscriptions.insert(subscription_id.clone());
        debug!("subscribed as {}", subscription_id);

        for old in previous {
            let close = ClientFrame::Close {
                subscription_id: old.clone(),
            }
            .to_json()?;
            self.send_text(close).await?;
            debug!("closed subscription {}", old);
        }
        Ok(())
    }

    /// Subscription ids whose events are currently accepted.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn subscribe_frame(&self) -> Result<(String, String), MeshError> {
        let subscription_id = Uuid::new_v4().simple().to_string();
        let frame = ClientFrame::Req {
            subscription_id: subscription_id.clone(),
            filter: self.filter.clone(),
        }
        .to_json()?;
        Ok((subscription_id, frame))
    }

    async fn send_text(&mut self, text: String) -> Result<(), MeshError> {
        let Link::Connected(ws) = &mut self.link else {
            return Err(MeshError::Transport("relay link is not connected".into()));
        };
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| MeshError::Transport(e.to_string()))
    }

    fn handle_text(&mut self, text: &str) -> Option<Value> {
        let frame = match RelayFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping relay frame: {}", e);
                return None;
            }
        };

        match frame {
            RelayFrame::Event {
                subscription_id,
                event,
            } => self.accept_event(&subscription_id, event),
            RelayFrame::Eose { subscription_id } => {
                debug!("end of stored events for {}", subscription_id);
                None
            }
            RelayFrame::Notice { message } => {
                info!("relay notice: {}", message);
                None
            }
            RelayFrame::Ok {
                event_id,
                accepted,
                message,
            } => {
                if accepted {
                    debug!("relay accepted {}", event_id);
                } else {
                    warn!("relay rejected {}: {}", event_id, message);
                }
                None
            }
            RelayFrame::Closed {
                subscription_id,
                message,
            } => {
                warn!("relay closed subscription {}: {}", subscription_id, message);
                self.subscriptions.remove(&subscription_id);
                None
            }
        }
    }

    fn accept_event(&mut self, subscription_id: &str, event: InboundEvent) -> Option<Value> {
        if !self.subscriptions.contains(subscription_id) {
            debug!("dropping event for unknown subscription {}", subscription_id);
            return None;
        }
        if !self.filter.matches(&event) {
            debug!("dropping event outside our filter");
            return None;
        }
        if self.verify_signatures {
            if let Err(e) = event.verify() {
                debug!("dropping unverifiable event: {}", e);
                return None;
            }
        }

        let key = event.dedup_key().to_string();
        if self.seen.contains(&key) {
            debug!("dropping duplicate event");
            return None;
        }
        if let (Some(created_at), Some(newest)) = (event.created_at, self.newest_created_at) {
            if created_at < newest {
                debug!("dropping stale event from {}", created_at);
                return None;
            }
        }

        let Some(fragment) = self.vault.cipher().decrypt_json(&event.content) else {
            debug!("dropping undecryptable event");
            return None;
        };
        if let Err(reason) = validate_fragment(&fragment) {
            debug!("dropping event: {}", reason);
            return None;
        }

        self.seen.insert(key);
        if event.created_at.is_some() {
            self.newest_created_at = self.newest_created_at.max(event.created_at);
        }
        Some(fragment)
    }
}
