//! Application-facing sync engine.
//!
//! Starts a [`ProtocolBridge`] and a pump task that applies the bridge's
//! output: the public key is published on a watch cell, received fragments
//! are written to the [`PreferenceStore`], and errors go to a broadcast
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tether_common::{validate_fragment, ControlMessage, Error, IdentitySeed, Result, SyncConfig};
use tether_crypto::PBKDF2_ITERATIONS;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeHandle, ProtocolBridge};
use crate::store::{PreferenceDoc, PreferenceStore};

/// Store document holding the synced fragment.
pub const PREFERENCES_DOC_ID: &str = "app_preferences";

pub struct SyncEngine {
    control: mpsc::Sender<ControlMessage>,
    store: Arc<dyn PreferenceStore>,
    public_key: watch::Receiver<Option<String>>,
    errors: broadcast::Sender<String>,
    received: broadcast::Sender<Value>,
    init_requested: Arc<AtomicBool>,
    bridge: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl SyncEngine {
    /// Validate `config` and start the session tasks on the current runtime.
    pub fn start(config: SyncConfig, store: Arc<dyn PreferenceStore>) -> Result<Self> {
        Self::start_with_iterations(config, store, PBKDF2_ITERATIONS)
    }

    /// [`SyncEngine::start`] with an explicit PBKDF2 iteration count.
    pub fn start_with_iterations(
        config: SyncConfig,
        store: Arc<dyn PreferenceStore>,
        iterations: u32,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = config.channel_capacity;

        let BridgeHandle {
            control,
            events,
            task: bridge,
        } = ProtocolBridge::spawn_with_iterations(config, iterations);

        let (key_tx, public_key) = watch::channel(None);
        let (errors, _) = broadcast::channel(capacity);
        let (received, _) = broadcast::channel(capacity);
        let init_requested = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn(pump(
            events,
            Arc::clone(&store),
            key_tx,
            errors.clone(),
            received.clone(),
            Arc::clone(&init_requested),
        ));

        Ok(Self {
            control,
            store,
            public_key,
            errors,
            received,
            init_requested,
            bridge,
            pump,
        })
    }

    /// Derive the identity and join the mesh.
    ///
    /// Only the first call does anything, unless initialization failed.
    pub async fn init(&self, seed: impl Into<IdentitySeed>) -> Result<()> {
        if self.init_requested.swap(true, Ordering::SeqCst) {
            warn!("init ignored, engine already initializing or initialized");
            return Ok(());
        }
        self.send(ControlMessage::INIT {
            identity_seed: seed.into(),
        })
        .await
    }

    /// Store `data` locally, then publish it.
    ///
    /// Returns `None` without touching the store if the identity is not
    /// ready yet.
    pub async fn push_update(&self, data: Value) -> Result<Option<PreferenceDoc>> {
        validate_fragment(&data).map_err(Error::validation)?;
        if self.public_key().is_none() {
            warn!("push_update skipped, engine not initialized");
            return Ok(None);
        }

        let doc = self.store.upsert(PREFERENCES_DOC_ID, data.clone());
        self.send(ControlMessage::SYNC_OUT { data }).await?;
        Ok(Some(doc))
    }

    /// Ask the relay for the latest fragment again.
    pub async fn refresh(&self) -> Result<()> {
        self.send(ControlMessage::SYNC_IN).await
    }

    /// Wait for the identity and return its public key.
    pub async fn ready(&self) -> Result<String> {
        let mut rx = self.public_key.clone();
        let key = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::transport("sync task stopped"))?
            .clone();
        key.ok_or_else(|| Error::transport("sync task stopped"))
    }

    pub fn public_key(&self) -> Option<String> {
        self.public_key.borrow().clone()
    }

    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        &self.store
    }

    /// Session errors, as reported to the controller.
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    /// Fragments received from other devices.
    pub fn fragments(&self) -> broadcast::Receiver<Value> {
        self.received.subscribe()
    }

    /// Stop the session and wait for its tasks to finish.
    pub async fn shutdown(self) {
        let Self {
            control,
            bridge,
            pump,
            ..
        } = self;
        drop(control);
        if let Err(e) = bridge.await {
            warn!("sync bridge ended abnormally: {}", e);
        }
        if let Err(e) = pump.await {
            warn!("sync pump ended abnormally: {}", e);
        }
    }

    async fn send(&self, msg: ControlMessage) -> Result<()> {
        self.control
            .send(msg)
            .await
            .map_err(|_| Error::transport("sync task stopped"))
    }
}

async fn pump(
    mut events: mpsc::Receiver<ControlMessage>,
    store: Arc<dyn PreferenceStore>,
    public_key: watch::Sender<Option<String>>,
    errors: broadcast::Sender<String>,
    received: broadcast::Sender<Value>,
    init_requested: Arc<AtomicBool>,
) {
    while let Some(msg) = events.recv().await {
        match msg {
            ControlMessage::READY { public_key: key } => {
                info!("sync identity {}", key);
                public_key.send_replace(Some(key));
            }
            ControlMessage::SYNC_RECEIVED { data } => {
                store.upsert(PREFERENCES_DOC_ID, data.clone());
                // No subscribers is fine.
                let _ = received.send(data);
            }
            ControlMessage::ERROR { message } => {
                // Before READY the only errors come from a failed INIT.
                if public_key.borrow().is_none() {
                    init_requested.store(false, Ordering::SeqCst);
                }
                error!("sync error: {}", message);
                let _ = errors.send(message);
            }
            other => debug!("ignoring {} from bridge", other.type_name()),
        }
    }
    debug!("sync pump stopped");
}
