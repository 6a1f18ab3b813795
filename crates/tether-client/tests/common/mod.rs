//! Local fake relay for integration tests.
//!
//! Stores every EVENT it receives, answers each REQ with the stored events
//! followed by EOSE, and records every frame a client sends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tether_common::SyncConfig;
use tether_core::UnsignedEvent;
use tether_crypto::{KeyVault, SeedDeriver};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const SALT: &str = "tether-test-salt";
pub const KIND: u16 = 30078;
pub const TAG: &str = "app_preferences";
pub const ITERATIONS: u32 = 1000;

pub struct FakeRelay {
    pub url: String,
    connections: Arc<AtomicUsize>,
    stored: Arc<Mutex<Vec<Value>>>,
    received: mpsc::UnboundedReceiver<Value>,
}

impl FakeRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let stored = Arc::new(Mutex::new(Vec::new()));
        let (tx, received) = mpsc::unbounded_channel();

        let counter = Arc::clone(&connections);
        let events = Arc::clone(&stored);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, tx.clone(), Arc::clone(&events)));
            }
        });

        Self {
            url,
            connections,
            stored,
            received,
        }
    }

    /// Add an event to be replayed on every REQ.
    pub fn store(&self, event: Value) {
        self.stored.lock().unwrap().push(event);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next frame with the given label sent by any client.
    pub async fn next_frame(&mut self, label: &str) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(10), self.received.recv())
                .await
                .expect("relay saw no frame")
                .expect("relay stopped");
            if frame[0] == label {
                return frame;
            }
        }
    }

    /// True if no frame with `label` arrives within `wait`.
    pub async fn quiet(&mut self, label: &str, wait: Duration) -> bool {
        timeout(wait, self.next_frame(label)).await.is_err()
    }
}

async fn serve(stream: TcpStream, tx: mpsc::UnboundedSender<Value>, stored: Arc<Mutex<Vec<Value>>>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let _ = tx.send(frame.clone());

        let replies = match frame[0].as_str() {
            Some("REQ") => {
                let sub = frame[1].clone();
                let mut replies: Vec<Value> = stored
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|event| json!(["EVENT", sub, event]))
                    .collect();
                replies.push(json!(["EOSE", sub]));
                replies
            }
            Some("EVENT") => {
                stored.lock().unwrap().push(frame[1].clone());
                vec![json!(["OK", frame[1]["id"], true, ""])]
            }
            _ => Vec::new(),
        };
        for reply in replies {
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                return;
            }
        }
    }
}

/// A ws:// URL nothing listens on.
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

/// A ws:// URL that accepts TCP connections and then never says a word.
pub async fn silent_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    url
}

pub fn config(relays: Vec<String>) -> SyncConfig {
    let mut config = SyncConfig::new(relays, SALT, KIND, TAG);
    config.reconnect_delay_ms = 50;
    config.connect_timeout_ms = Some(2_000);
    config
}

pub fn vault(seed: &str) -> KeyVault {
    KeyVault::harden_with_iterations(&SeedDeriver::native().derive(seed), SALT, ITERATIONS)
        .unwrap()
}

/// A signed, encrypted event as another device with `vault` would publish it.
pub fn signed_event(vault: &KeyVault, data: &Value, created_at: u64) -> Value {
    let content = vault.cipher().encrypt_json(data).unwrap();
    let event = UnsignedEvent::new(&vault.public_key(), KIND, TAG, content, created_at)
        .sign(vault.keypair())
        .unwrap();
    serde_json::to_value(event).unwrap()
}
