//! Session state tracking for the ET-312 protocol
//!
//! A session represents one keyed connection to a box and tracks:
//! - Connection state
//! - Session key (only present while connected)

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::key::SessionKey;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No key agreed; connect may be called
    Disconnected,

    /// Sync and key exchange in progress
    Handshaking,

    /// Key agreed, commands allowed
    Connected,

    /// Transport released, session finished
    Closed,
}

/// Session tracker
///
/// Holds the connection state together with the session key so that they
/// always change in one step. Thread-safe and can be cloned cheaply (Arc
/// internally).
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<parking_lot::RwLock<SessionInner>>,
}

#[derive(Debug)]
struct SessionInner {
    state: ConnectionState,
    key: Option<SessionKey>,
}

impl Session {
    /// Create a new disconnected session
    pub fn new() -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(SessionInner {
                state: ConnectionState::Disconnected,
                key: None,
            })),
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Get the session key, present only while connected
    pub fn key(&self) -> Option<SessionKey> {
        self.inner.read().key
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    /// Enter `Handshaking` from `Disconnected`
    pub fn begin_handshake(&self) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.state != ConnectionState::Disconnected {
            return Err(Error::InvalidSessionState(format!(
                "Cannot start handshake from state: {:?}",
                inner.state
            )));
        }

        inner.state = ConnectionState::Handshaking;
        Ok(())
    }

    /// Install the derived key and enter `Connected`
    pub fn complete_handshake(&self, key: SessionKey) -> Result<()> {
        let mut inner = self.inner.write();

        if inner.state != ConnectionState::Handshaking {
            return Err(Error::InvalidSessionState(format!(
                "Cannot complete handshake from state: {:?}",
                inner.state
            )));
        }

        inner.key = Some(key);
        inner.state = ConnectionState::Connected;
        Ok(())
    }

    /// Abandon a handshake; no partial key survives
    pub fn abort_handshake(&self) {
        let mut inner = self.inner.write();
        if inner.state == ConnectionState::Handshaking {
            Self::zero_key(&mut inner);
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Drop back to `Disconnected`, zeroing the key
    ///
    /// Used when the link is desynchronized and a new handshake is needed.
    /// A closed session stays closed.
    pub fn disconnect(&self) {
        let mut inner = self.inner.write();
        Self::zero_key(&mut inner);
        if inner.state != ConnectionState::Closed {
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Close session, zeroing the key
    pub fn close(&self) {
        let mut inner = self.inner.write();
        Self::zero_key(&mut inner);
        inner.state = ConnectionState::Closed;
    }

    fn zero_key(inner: &mut SessionInner) {
        if let Some(key) = inner.key.as_mut() {
            key.zeroize();
        }
        inner.key = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
