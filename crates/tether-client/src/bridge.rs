//! The sync session task.
//!
//! A [`ProtocolBridge`] owns one session. It moves through three phases:
//!
//! ```text
//! Idle --INIT--> Initializing --vault ready--> Active
//!   ^                  |
//!   +-- key failure ---+
//! ```
//!
//! Control messages, relay traffic, reconnect timers and key stretching
//! completion are multiplexed in a single `tokio::select!` loop, so none of
//! them ever run concurrently with another.

use serde_json::Value;
use tether_common::{ControlMessage, Error, IdentitySeed, SeedEngineKind, SyncConfig};
use tether_crypto::{normalize_seed, CryptoError, KeyVault, SeedDeriver, PBKDF2_ITERATIONS};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::relay::{MeshEvent, RelayMeshClient};

/// Channels connecting a controller to a spawned bridge.
pub struct BridgeHandle {
    /// Controller to bridge. Dropping it stops the bridge.
    pub control: mpsc::Sender<ControlMessage>,
    /// Bridge to controller.
    pub events: mpsc::Receiver<ControlMessage>,
    pub task: JoinHandle<()>,
}

enum Phase {
    Idle,
    Initializing(JoinHandle<Result<KeyVault, CryptoError>>),
    Active(RelayMeshClient),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Initializing(_) => "initializing",
            Phase::Active(_) => "active",
        }
    }
}

enum Activity {
    Initialized(Result<Result<KeyVault, CryptoError>, JoinError>),
    Mesh(MeshEvent),
}

/// Wait for whatever the current phase produces next.
async fn drive(phase: &mut Phase) -> Activity {
    match phase {
        Phase::Idle => std::future::pending().await,
        Phase::Initializing(task) => Activity::Initialized(task.await),
        Phase::Active(mesh) => Activity::Mesh(mesh.next_event().await),
    }
}

pub struct ProtocolBridge {
    config: SyncConfig,
    deriver: SeedDeriver,
    iterations: u32,
    phase: Phase,
    outbound: mpsc::Sender<ControlMessage>,
}

impl ProtocolBridge {
    pub fn new(config: SyncConfig, outbound: mpsc::Sender<ControlMessage>) -> Self {
        let deriver = match config.seed_engine {
            SeedEngineKind::Native => SeedDeriver::native(),
            SeedEngineKind::Hash => SeedDeriver::hash_only(),
        };
        Self {
            config,
            deriver,
            iterations: PBKDF2_ITERATIONS,
            phase: Phase::Idle,
            outbound,
        }
    }

    /// Override the PBKDF2 iteration count. Anything below
    /// [`PBKDF2_ITERATIONS`] weakens the session key; tests only.
    pub fn with_key_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Spawn a bridge on the current runtime.
    pub fn spawn(config: SyncConfig) -> BridgeHandle {
        Self::spawn_with_iterations(config, PBKDF2_ITERATIONS)
    }

    pub fn spawn_with_iterations(config: SyncConfig, iterations: u32) -> BridgeHandle {
        let capacity = config.channel_capacity.max(1);
        let (control, inbound) = mpsc::channel(capacity);
        let (outbound, events) = mpsc::channel(capacity);
        let bridge = Self::new(config, outbound).with_key_iterations(iterations);
        let task = tokio::spawn(bridge.run(inbound));
        BridgeHandle {
            control,
            events,
            task,
        }
    }

    /// Run until the controller drops its sender.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<ControlMessage>) {
        info!("sync bridge started");
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_control(msg).await,
                    None => break,
                },
                activity = drive(&mut self.phase) => self.handle_activity(activity).await,
            }
        }
        info!("controller gone, sync bridge stopping");
    }

    async fn handle_control(&mut self, msg: ControlMessage) {
        if !msg.is_controller_request() {
            warn!("controller sent {}", msg.type_name());
            self.emit(ControlMessage::error(format!(
                "unexpected message type: {}",
                msg.type_name()
            )))
            .await;
            return;
        }
        if let Err(e) = msg.validate() {
            self.emit(ControlMessage::error(e)).await;
            return;
        }

        match msg {
            ControlMessage::INIT { identity_seed } => self.start_init(identity_seed),
            ControlMessage::SYNC_OUT { data } => self.sync_out(data).await,
            ControlMessage::SYNC_IN => self.sync_in().await,
            _ => {}
        }
    }

    fn start_init(&mut self, identity_seed: IdentitySeed) {
        if !matches!(self.phase, Phase::Idle) {
            warn!("INIT ignored, session is {}", self.phase.name());
            return;
        }

        let normalized = normalize_seed(&identity_seed.parts());
        let deriver = self.deriver.clone();
        let salt = self.config.platform_salt.clone();
        let iterations = self.iterations;
        info!("deriving identity with {} engine", deriver.engine_name());

        self.phase = Phase::Initializing(tokio::task::spawn_blocking(move || {
            let seed = deriver.derive(&normalized);
            KeyVault::harden_with_iterations(&seed, &salt, iterations)
        }));
    }

    async fn handle_activity(&mut self, activity: Activity) {
        match activity {
            Activity::Initialized(joined) => self.finish_init(joined).await,
            Activity::Mesh(MeshEvent::Fragment(data)) => {
                self.emit(ControlMessage::SYNC_RECEIVED { data }).await
            }
            Activity::Mesh(MeshEvent::Connected { endpoint }) => {
                debug!("mesh up via {}", endpoint)
            }
            Activity::Mesh(MeshEvent::Disconnected {
                endpoint,
                next_index,
            }) => debug!("mesh down on {}, next relay #{}", endpoint, next_index),
        }
    }

    async fn finish_init(&mut self, joined: Result<Result<KeyVault, CryptoError>, JoinError>) {
        let vault = match joined {
            Ok(Ok(vault)) => vault,
            Ok(Err(e)) => return self.abort_init(Error::key_derivation(e)).await,
            Err(e) => {
                return self
                    .abort_init(Error::key_derivation(format!("derivation task failed: {e}")))
                    .await
            }
        };
        let mut mesh = match RelayMeshClient::new(&self.config, vault) {
            Ok(mesh) => mesh,
            Err(e) => return self.abort_init(e.into()).await,
        };

        let public_key = mesh.vault().public_key().to_string();
        info!("identity ready: {}", public_key);
        self.emit(ControlMessage::READY { public_key }).await;
        mesh.connect();
        self.phase = Phase::Active(mesh);
    }

    async fn abort_init(&mut self, err: Error) {
        error!("session setup failed: {}", err);
        self.phase = Phase::Idle;
        self.emit(ControlMessage::error(err)).await;
    }

    async fn sync_out(&mut self, data: Value) {
        let Phase::Active(mesh) = &mut self.phase else {
            warn!("SYNC_OUT dropped, session is {}", self.phase.name());
            return;
        };
        let result = mesh.publish(&data).await;
        if let Err(e) = result {
            self.report(e.into()).await;
        }
    }

    async fn sync_in(&mut self) {
        let Phase::Active(mesh) = &mut self.phase else {
            warn!("SYNC_IN dropped, session is {}", self.phase.name());
            return;
        };
        let result = mesh.subscribe().await;
        if let Err(e) = result {
            self.report(e.into()).await;
        }
    }

    async fn report(&mut self, err: Error) {
        if err.is_mesh_noise() {
            warn!("relay mesh: {}", err);
        } else {
            self.emit(ControlMessage::error(err)).await;
        }
    }

    async fn emit(&mut self, msg: ControlMessage) {
        if self.outbound.send(msg).await.is_err() {
            debug!("controller stopped listening");
        }
    }
}
