//! EvalNet Validator Coordination
//!
//! The coordination core that sits between the agent scheduler and the fleet
//! of validators:
//!
//! - [`ConnectionRegistry`]: live validator channels keyed by hotkey
//! - [`AgentStateMachine`]: serialized lifecycle transitions per version
//! - [`EvaluationDispatcher`]: atomic hand-out of pending evaluations
//! - [`ConsensusEngine`]: collapses validator scores into one top agent
//! - [`WeightBroadcastLoop`]: periodically pushes the top agent to validators
//!
//! [`Coordinator`] wires them together over one [`CoordinationStore`] and owns
//! the background loop's lifecycle. Construct one per process and share it by
//! `Arc`.
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let coordinator = Arc::new(Coordinator::new(store, CoordinatorConfig::default()));
//! coordinator.start();
//! // ...
//! coordinator.shutdown().await;
//! ```

pub mod broadcast;
pub mod consensus;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use evalnet_store::CoordinationStore;

pub use broadcast::{BroadcastRecord, Clock, SystemClock, TickOutcome, WeightBroadcastLoop};
pub use consensus::{
    ConsensusConfig, DEFAULT_MIN_VALIDATORS, ConsensusEngine, SelectionPolicy, ThresholdOldestPolicy, VersionAggregate,
};
pub use dispatcher::EvaluationDispatcher;
pub use error::{CoordinationError, CoordinationResult};
pub use registry::{
    BroadcastReport, ChannelReceiver, ConnectionInfo, ConnectionRegistry, DeliveryFailure,
    ValidatorChannel,
};
pub use state_machine::{AgentStateMachine, TransitionEvent};

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Minutes between weight broadcasts
    #[serde(default = "default_weight_interval_minutes")]
    pub weight_interval_minutes: u64,
    /// Outbound events queued per validator before sends fail
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

fn default_weight_interval_minutes() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            weight_interval_minutes: default_weight_interval_minutes(),
            channel_capacity: default_channel_capacity(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Broadcast interval as a duration
    pub fn weight_interval(&self) -> Duration {
        Duration::from_secs(self.weight_interval_minutes.saturating_mul(60))
    }
}

struct Background {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The coordination service
pub struct Coordinator {
    registry: Arc<ConnectionRegistry>,
    state_machine: Arc<AgentStateMachine>,
    dispatcher: Arc<EvaluationDispatcher>,
    consensus: Arc<ConsensusEngine>,
    broadcaster: Arc<WeightBroadcastLoop>,
    background: Mutex<Option<Background>>,
}

impl Coordinator {
    /// Build a coordinator with the system clock
    pub fn new(store: Arc<dyn CoordinationStore>, config: CoordinatorConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build a coordinator with a custom clock
    pub fn with_clock(
        store: Arc<dyn CoordinationStore>,
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let consensus = Arc::new(ConsensusEngine::new(store.clone(), config.consensus.clone()));
        Self::assemble(store, config, consensus, clock)
    }

    /// Build a coordinator around a custom consensus engine
    pub fn with_consensus(
        store: Arc<dyn CoordinationStore>,
        config: CoordinatorConfig,
        consensus: ConsensusEngine,
    ) -> Self {
        Self::assemble(store, config, Arc::new(consensus), Arc::new(SystemClock))
    }

    fn assemble(
        store: Arc<dyn CoordinationStore>,
        config: CoordinatorConfig,
        consensus: Arc<ConsensusEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.channel_capacity));
        let broadcaster = Arc::new(WeightBroadcastLoop::new(
            consensus.clone(),
            registry.clone(),
            clock,
            config.weight_interval(),
        ));

        Self {
            registry,
            state_machine: Arc::new(AgentStateMachine::new(store.clone())),
            dispatcher: Arc::new(EvaluationDispatcher::new(store)),
            consensus,
            broadcaster,
            background: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn state_machine(&self) -> &Arc<AgentStateMachine> {
        &self.state_machine
    }

    pub fn dispatcher(&self) -> &Arc<EvaluationDispatcher> {
        &self.dispatcher
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn broadcaster(&self) -> &Arc<WeightBroadcastLoop> {
        &self.broadcaster
    }

    /// Spawn the weight broadcast loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut background = self.background.lock();
        if background.is_some() {
            warn!("Coordinator already started");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.broadcaster.clone().run(shutdown_rx));
        *background = Some(Background { shutdown, handle });
        info!("Coordinator started");
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Stop the broadcast loop and close every validator connection
    pub async fn shutdown(&self) {
        let background = self.background.lock().take();
        if let Some(Background { shutdown, handle }) = background {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Weight broadcast loop ended abnormally");
            }
        }

        self.registry.close_all();
        info!("Coordinator stopped");
    }
}
