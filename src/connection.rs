//! Connection state machine around the shared client handle.
//!
//! The handle and the state live in one slot behind a reader/writer lock,
//! so "is connected" and "get handle" are a single read. An atomic mirror of
//! the state answers `is_connected` / `is_closing` without touching the lock.

use crate::client::ConsumerClient;
use crate::error::{ConsumerError, Result};
use parking_lot::{RwLock, RwLockReadGuard};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connected = 1,
    Closing = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Handle present iff the state is Connected or Closing
enum Slot {
    Disconnected,
    Connected(Arc<dyn ConsumerClient>),
    Closing(Arc<dyn ConsumerClient>),
}

/// Shared proof that the handle stays alive for the guard's lifetime.
///
/// While any guard is held, the handle cannot enter Closing.
pub struct ClientGuard<'a> {
    _slot: RwLockReadGuard<'a, Slot>,
    client: Arc<dyn ConsumerClient>,
}

impl Deref for ClientGuard<'_> {
    type Target = dyn ConsumerClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

pub struct Connection {
    slot: RwLock<Slot>,
    state: AtomicU8,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Disconnected),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_closing(&self) -> bool {
        self.state() == ConnectionState::Closing
    }

    /// Shared access to a Connected handle.
    pub fn connected(&self) -> Result<ClientGuard<'_>> {
        let slot = self.slot.read();
        let client = match &*slot {
            Slot::Connected(client) => client.clone(),
            _ => return Err(ConsumerError::disconnected()),
        };
        Ok(ClientGuard { _slot: slot, client })
    }

    /// Shared access to the handle while Connected or Closing.
    pub fn connected_or_closing(&self) -> Result<ClientGuard<'_>> {
        let slot = self.slot.read();
        let client = match &*slot {
            Slot::Connected(client) | Slot::Closing(client) => client.clone(),
            Slot::Disconnected => return Err(ConsumerError::disconnected()),
        };
        Ok(ClientGuard { _slot: slot, client })
    }

    /// Creates and installs a handle under the exclusive lock.
    ///
    /// Returns `None` when a handle was already installed. A creation error
    /// string becomes a `StateError`.
    pub fn install<F>(&self, create: F) -> Result<Option<Arc<dyn ConsumerClient>>>
    where
        F: FnOnce() -> std::result::Result<Arc<dyn ConsumerClient>, String>,
    {
        let mut slot = self.slot.write();
        if !matches!(*slot, Slot::Disconnected) {
            return Ok(None);
        }

        let client = create().map_err(ConsumerError::State)?;
        *slot = Slot::Connected(client.clone());
        self.state.store(ConnectionState::Connected as u8, Ordering::Release);
        Ok(Some(client))
    }

    /// Moves Connected to Closing and hands back the handle to close.
    ///
    /// Blocks until every outstanding [`ClientGuard`] is dropped. Returns
    /// `None` when there is nothing to close.
    pub fn begin_close(&self) -> Option<Arc<dyn ConsumerClient>> {
        let mut slot = self.slot.write();
        match std::mem::replace(&mut *slot, Slot::Disconnected) {
            Slot::Connected(client) => {
                *slot = Slot::Closing(client.clone());
                self.state.store(ConnectionState::Closing as u8, Ordering::Release);
                Some(client)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Releases the handle. Always lands in Disconnected.
    pub fn finish_close(&self) {
        let mut slot = self.slot.write();
        *slot = Slot::Disconnected;
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
    }
}
