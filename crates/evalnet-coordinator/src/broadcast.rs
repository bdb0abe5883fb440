//! Periodic weight broadcast
//!
//! Every interval the loop asks [`ConsensusEngine`] for the top agent and
//! pushes it to every connected validator as a `set-weights` event. Ticks never
//! overlap: a tick that finds another one in flight is skipped. A failing tick
//! is logged and the loop carries on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use evalnet_types::{ServerEvent, TopAgentRecord};

use crate::consensus::ConsensusEngine;
use crate::error::CoordinationResult;
use crate::registry::ConnectionRegistry;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Time source for the broadcast loop
#[async_trait]
pub trait Clock: Send + Sync {
    /// Wall-clock time used to stamp broadcasts
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Tokio timers and the system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A completed broadcast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastRecord {
    pub at: DateTime<Utc>,
    pub top_agent: TopAgentRecord,
    pub delivered: usize,
    pub failed: usize,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Weights were pushed to the connected validators
    Broadcast(BroadcastRecord),
    /// No version qualified; nothing was sent
    NoConsensus,
    /// Another tick was still running
    Skipped,
}

/// Periodic top-agent broadcaster
pub struct WeightBroadcastLoop {
    engine: Arc<ConsensusEngine>,
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    in_flight: Mutex<()>,
    ticks: AtomicU64,
    last_broadcast: RwLock<Option<BroadcastRecord>>,
}

impl WeightBroadcastLoop {
    pub fn new(
        engine: Arc<ConsensusEngine>,
        registry: Arc<ConnectionRegistry>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            clock,
            interval: interval.max(MIN_INTERVAL),
            in_flight: Mutex::new(()),
            ticks: AtomicU64::new(0),
            last_broadcast: RwLock::new(None),
        }
    }

    /// Time between ticks
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks attempted so far, including skipped and failed ones
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Most recent successful broadcast
    pub fn last_broadcast(&self) -> Option<BroadcastRecord> {
        self.last_broadcast.read().clone()
    }

    /// Run one tick now
    pub async fn tick(&self) -> CoordinationResult<TickOutcome> {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Weight broadcast already in flight, skipping tick");
            return Ok(TickOutcome::Skipped);
        };

        let Some(top_agent) = self.engine.top_agent().await? else {
            info!("No version qualifies for consensus, skipping weight broadcast");
            return Ok(TickOutcome::NoConsensus);
        };

        let report = self.registry.broadcast(&ServerEvent::SetWeights(top_agent.clone()));
        let record = BroadcastRecord {
            at: self.clock.now(),
            top_agent,
            delivered: report.delivered_count(),
            failed: report.failed_count(),
        };

        info!(
            version_id = %record.top_agent.version_id,
            miner = %record.top_agent.miner_hotkey,
            avg_score = record.top_agent.avg_score,
            delivered = record.delivered,
            failed = record.failed,
            "Weights broadcast"
        );

        *self.last_broadcast.write() = Some(record.clone());
        Ok(TickOutcome::Broadcast(record))
    }

    /// Tick every interval until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Weight broadcast loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Weight broadcast tick failed");
            }

            tokio::select! {
                _ = self.clock.sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Weight broadcast loop stopped");
    }
}
