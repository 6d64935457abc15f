//! Event dispatch for consumer lifecycle notifications.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle notifications published by a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerEvent {
    Connected { client_name: String },
    Disconnected { error: Option<String> },
    Subscribed { topics: Vec<String> },
    Unsubscribed,
    Assigned { partitions: usize },
    Unassigned,
    IncrementalAssigned { added: usize, total: usize },
    IncrementalUnassigned { removed: usize, total: usize },
    ConsumeLoopStarted,
    ConsumeLoopStopped,
}

/// Fan-out of [`ConsumerEvent`]s to any number of listeners.
///
/// Delivery only happens while the dispatcher is active. Events published
/// while inactive, or with nobody listening, are dropped.
#[derive(Debug)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ConsumerEvent>,
    active: AtomicBool,
    client_name: RwLock<Option<String>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            active: AtomicBool::new(false),
            client_name: RwLock::new(None),
        }
    }

    pub fn listen(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.sender.subscribe()
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Records the name the client registered under.
    pub fn set_client_name(&self, name: &str) {
        *self.client_name.write() = Some(name.to_string());
    }

    pub fn client_name(&self) -> Option<String> {
        self.client_name.read().clone()
    }

    pub fn publish(&self, event: ConsumerEvent) {
        if !self.is_active() {
            return;
        }
        if self.sender.send(event).is_err() {
            trace!("No event listeners attached");
        }
    }
}
