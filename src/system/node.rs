//! Tracking node: feeds synchronized observations to the tracker.
//!
//! Producers push tuples into a bounded channel; the node consumes them one
//! at a time on its own thread. A full queue drops the newest tuple instead
//! of blocking the producer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, info};

use crate::system::messages::Observation;
use crate::tracking::Tracker;
use crate::tracking::result::ObservationOutcome;

/// Receive timeout, allows shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Counters over the lifetime of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub received: usize,
    pub dropped: usize,
    pub initialized: usize,
    pub tracked: usize,
}

/// Producer side of the node's queue.
#[derive(Debug, Clone)]
pub struct ObservationSender {
    sender: Sender<Observation>,
}

impl ObservationSender {
    /// Queue a tuple without blocking.
    ///
    /// Returns `false` when the tuple was discarded (queue full or node gone).
    pub fn offer(&self, obs: Observation) -> bool {
        match self.sender.try_send(obs) {
            Ok(()) => true,
            Err(TrySendError::Full(obs)) => {
                debug!(timestamp_ns = obs.timestamp_ns(), "Tracking queue full, dropping observation");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue a tuple, waiting for room. Returns `false` if the node is gone.
    pub fn send(&self, obs: Observation) -> bool {
        self.sender.send(obs).is_ok()
    }
}

/// Shared flag asking a running node to stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Consumer loop owning the tracker.
pub struct TrackingNode {
    tracker: Tracker,
    receiver: Receiver<Observation>,
    shutdown: ShutdownHandle,
    stats: NodeStats,
}

impl TrackingNode {
    /// Create a node and the sender feeding it.
    pub fn new(tracker: Tracker, capacity: usize) -> (Self, ObservationSender) {
        let (sender, receiver) = bounded::<Observation>(capacity.max(1));
        let node = Self {
            tracker,
            receiver,
            shutdown: ShutdownHandle::default(),
            stats: NodeStats::default(),
        };
        (node, ObservationSender { sender })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Process observations until every sender is dropped or shutdown is
    /// requested. Returns the tracker for inspection.
    pub fn run(mut self) -> (Tracker, NodeStats) {
        loop {
            if self.shutdown.is_shutdown_requested() {
                break;
            }

            match self.receiver.recv_timeout(RECV_TIMEOUT) {
                Ok(obs) => self.process(&obs),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(
            received = self.stats.received,
            dropped = self.stats.dropped,
            tracked = self.stats.tracked,
            state = %self.tracker.state(),
            "Tracking node stopped"
        );
        (self.tracker, self.stats)
    }

    /// Process one observation on the caller's thread.
    pub fn process(&mut self, obs: &Observation) {
        self.stats.received += 1;
        match self.tracker.on_observation(obs) {
            ObservationOutcome::Dropped(_) => self.stats.dropped += 1,
            ObservationOutcome::Initialized => self.stats.initialized += 1,
            ObservationOutcome::Tracked { .. } => self.stats.tracked += 1,
        }
    }
}
