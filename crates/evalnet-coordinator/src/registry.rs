//! Live validator connections
//!
//! Each connection owns a bounded outbound queue. The socket task drains the
//! queue through a [`ChannelReceiver`]; the registry keeps the sending half
//! keyed by validator hotkey. At most one entry exists per hotkey.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use evalnet_types::{ServerEvent, ValidatorHotkey};

use crate::error::{CoordinationError, CoordinationResult};

/// Registry-side half of a validator connection
pub struct ValidatorChannel {
    connection_id: u64,
    tx: mpsc::Sender<ServerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    connected_at: DateTime<Utc>,
}

impl ValidatorChannel {
    /// Connection identifier, unique per registry
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn try_deliver(&self, event: ServerEvent) -> Result<(), TrySendError<ServerEvent>> {
        self.tx.try_send(event)
    }

    /// Signal the socket task to hang up
    fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Socket-side half of a validator connection
pub struct ChannelReceiver {
    connection_id: u64,
    events: mpsc::Receiver<ServerEvent>,
    replies: mpsc::Sender<ServerEvent>,
    closed: oneshot::Receiver<()>,
    hung_up: bool,
}

impl ChannelReceiver {
    /// Connection identifier matching the registry entry
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Sender for direct replies on this connection
    pub fn reply_sender(&self) -> mpsc::Sender<ServerEvent> {
        self.replies.clone()
    }

    /// Next outbound event, or `None` once the registry closed or dropped
    /// this connection.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        if self.hung_up {
            return None;
        }
        tokio::select! {
            biased;
            _ = &mut self.closed => {
                self.hung_up = true;
                None
            }
            event = self.events.recv() => event,
        }
    }
}

/// Registered connection metadata
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub validator_hotkey: ValidatorHotkey,
    pub connection_id: u64,
    pub connected_at: DateTime<Utc>,
}

/// Failed delivery of one broadcast
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub validator_hotkey: ValidatorHotkey,
    pub error: CoordinationError,
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<ValidatorHotkey>,
    pub failed: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    /// Number of recipients the event was enqueued for
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Number of recipients that could not be reached
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Registry of live validator connections
pub struct ConnectionRegistry {
    connections: DashMap<ValidatorHotkey, ValidatorChannel>,
    next_connection_id: AtomicU64,
    channel_capacity: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose connections queue up to `channel_capacity` events
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Allocate a fresh connection pair
    pub fn open_channel(&self) -> (ValidatorChannel, ChannelReceiver) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, events) = mpsc::channel(self.channel_capacity);
        let (shutdown, closed) = oneshot::channel();

        let channel = ValidatorChannel {
            connection_id,
            tx: tx.clone(),
            shutdown: Some(shutdown),
            connected_at: Utc::now(),
        };
        let receiver = ChannelReceiver {
            connection_id,
            events,
            replies: tx,
            closed,
            hung_up: false,
        };
        (channel, receiver)
    }

    /// Register `channel` for `hotkey`, closing any previous connection
    pub fn register(&self, hotkey: ValidatorHotkey, channel: ValidatorChannel) -> u64 {
        let connection_id = channel.connection_id;
        if let Some(previous) = self.connections.insert(hotkey.clone(), channel) {
            info!(
                validator = %hotkey,
                old_connection = previous.connection_id,
                new_connection = connection_id,
                "Replacing existing validator connection"
            );
            previous.close();
        } else {
            info!(validator = %hotkey, connection = connection_id, "Validator connected");
        }
        connection_id
    }

    /// Remove the entry for `hotkey`, whichever connection it is. Idempotent.
    pub fn deregister(&self, hotkey: &ValidatorHotkey) -> bool {
        match self.connections.remove(hotkey) {
            Some((_, channel)) => {
                info!(validator = %hotkey, connection = channel.connection_id, "Validator deregistered");
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `hotkey` only if it is still `connection_id`
    pub fn release(&self, hotkey: &ValidatorHotkey, connection_id: u64) -> bool {
        match self
            .connections
            .remove_if(hotkey, |_, channel| channel.connection_id == connection_id)
        {
            Some((_, channel)) => {
                debug!(validator = %hotkey, connection = connection_id, "Validator connection released");
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Enqueue `event` for one validator
    pub fn send_to(&self, hotkey: &ValidatorHotkey, event: ServerEvent) -> CoordinationResult<()> {
        let (connection_id, outcome) = match self.connections.get(hotkey) {
            Some(channel) => (channel.connection_id, channel.try_deliver(event)),
            None => return Err(CoordinationError::NotConnected(hotkey.clone())),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CoordinationError::ChannelFull(hotkey.clone())),
            Err(TrySendError::Closed(_)) => {
                self.release(hotkey, connection_id);
                Err(CoordinationError::NotConnected(hotkey.clone()))
            }
        }
    }

    /// Enqueue `event` for every registered validator.
    ///
    /// Each recipient is handled independently; failures are logged and
    /// reported, never propagated.
    pub fn broadcast(&self, event: &ServerEvent) -> BroadcastReport {
        let recipients: Vec<ValidatorHotkey> =
            self.connections.iter().map(|entry| entry.key().clone()).collect();

        let mut report = BroadcastReport::default();
        for hotkey in recipients {
            match self.send_to(&hotkey, event.clone()) {
                Ok(()) => report.delivered.push(hotkey),
                Err(error) => {
                    warn!(validator = %hotkey, event = event.name(), error = %error, "Broadcast delivery failed");
                    report.failed.push(DeliveryFailure {
                        validator_hotkey: hotkey,
                        error,
                    });
                }
            }
        }
        report
    }

    /// Whether a connection is registered for `hotkey`
    pub fn is_connected(&self, hotkey: &ValidatorHotkey) -> bool {
        self.connections.contains_key(hotkey)
    }

    /// Registered connection id for `hotkey`
    pub fn connection_id(&self, hotkey: &ValidatorHotkey) -> Option<u64> {
        self.connections.get(hotkey).map(|c| c.connection_id)
    }

    /// Number of registered validators
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True if no validator is registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Metadata for every registered connection
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                validator_hotkey: entry.key().clone(),
                connection_id: entry.value().connection_id,
                connected_at: entry.value().connected_at,
            })
            .collect();
        infos.sort_by(|a, b| a.validator_hotkey.cmp(&b.validator_hotkey));
        infos
    }

    /// Close and remove every connection
    pub fn close_all(&self) {
        let hotkeys: Vec<ValidatorHotkey> =
            self.connections.iter().map(|entry| entry.key().clone()).collect();
        for hotkey in hotkeys {
            self.deregister(&hotkey);
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalnet_types::{MinerHotkey, TopAgentRecord, VersionId};

    fn hotkey(s: &str) -> ValidatorHotkey {
        ValidatorHotkey::new(s)
    }

    fn weights_event() -> ServerEvent {
        ServerEvent::SetWeights(TopAgentRecord {
            miner_hotkey: MinerHotkey::new("m1"),
            version_id: VersionId::new(),
            avg_score: 0.9,
        })
    }

    #[tokio::test]
    async fn test_send_to_unknown_validator() {
        let registry = ConnectionRegistry::new(8);
        let err = registry.send_to(&hotkey("v1"), ServerEvent::no_evaluation()).unwrap_err();
        assert!(matches!(err, CoordinationError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_send_to_delivers() {
        let registry = ConnectionRegistry::new(8);
        let (channel, mut receiver) = registry.open_channel();
        registry.register(hotkey("v1"), channel);

        registry.send_to(&hotkey("v1"), ServerEvent::no_evaluation()).unwrap();
        assert_eq!(receiver.recv().await, Some(ServerEvent::no_evaluation()));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_closes_previous() {
        let registry = ConnectionRegistry::new(8);
        let (first, mut first_rx) = registry.open_channel();
        let (second, mut second_rx) = registry.open_channel();
        let second_id = second.connection_id();

        registry.register(hotkey("v1"), first);
        registry.register(hotkey("v1"), second);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection_id(&hotkey("v1")), Some(second_id));
        assert_eq!(first_rx.recv().await, None);

        registry.send_to(&hotkey("v1"), ServerEvent::no_evaluation()).unwrap();
        assert_eq!(second_rx.recv().await, Some(ServerEvent::no_evaluation()));
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_connection() {
        let registry = ConnectionRegistry::new(8);
        let (first, _first_rx) = registry.open_channel();
        let first_id = first.connection_id();
        let (second, _second_rx) = registry.open_channel();
        let second_id = second.connection_id();

        registry.register(hotkey("v1"), first);
        registry.register(hotkey("v1"), second);

        // The old socket task finishing must not evict the new connection.
        assert!(!registry.release(&hotkey("v1"), first_id));
        assert_eq!(registry.connection_id(&hotkey("v1")), Some(second_id));

        assert!(registry.release(&hotkey("v1"), second_id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_idempotent() {
        let registry = ConnectionRegistry::new(8);
        let (channel, mut receiver) = registry.open_channel();
        registry.register(hotkey("v1"), channel);

        assert!(registry.deregister(&hotkey("v1")));
        assert!(!registry.deregister(&hotkey("v1")));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_broadcast_reports_closed_channel_once() {
        let registry = ConnectionRegistry::new(8);
        let (a, mut a_rx) = registry.open_channel();
        let (b, mut b_rx) = registry.open_channel();
        let (c, c_rx) = registry.open_channel();
        registry.register(hotkey("a"), a);
        registry.register(hotkey("b"), b);
        registry.register(hotkey("c"), c);

        drop(c_rx);

        let event = weights_event();
        let report = registry.broadcast(&event);

        // Checks the report; each entry in `failed` is logged with one warn.
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed[0].validator_hotkey, hotkey("c"));
        assert_eq!(a_rx.recv().await, Some(event.clone()));
        assert_eq!(b_rx.recv().await, Some(event));

        // The dead connection is pruned.
        assert!(!registry.is_connected(&hotkey("c")));
    }

    #[tokio::test]
    async fn test_full_queue_reports_channel_full() {
        let registry = ConnectionRegistry::new(1);
        let (channel, _receiver) = registry.open_channel();
        registry.register(hotkey("v1"), channel);

        registry.send_to(&hotkey("v1"), ServerEvent::no_evaluation()).unwrap();
        let err = registry.send_to(&hotkey("v1"), ServerEvent::no_evaluation()).unwrap_err();
        assert!(matches!(err, CoordinationError::ChannelFull(_)));
        assert!(registry.is_connected(&hotkey("v1")));
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new(8);
        let (a, mut a_rx) = registry.open_channel();
        registry.register(hotkey("a"), a);
        registry.close_all();
        assert!(registry.is_empty());
        assert_eq!(a_rx.recv().await, None);
    }
}
