//! High-level error types

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Timeout: no reply within {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(#[from] et312_core::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Box not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] et312_transport::Error),

    #[error("Session desynchronized from the box, reconnect required")]
    Desynchronized,

    #[error("Session closed")]
    Closed,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Retrying the same command on the same session might succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Protocol(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// The session has to be (re)connected before it can be used again
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Handshake(_)
                | Self::Desynchronized
                | Self::Transport(_)
                | Self::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_recoverable());
        assert!(Error::Protocol(et312_core::Error::DeviceRejected).is_recoverable());
        assert!(!Error::NotConnected.is_recoverable());
        assert!(!Error::NotConnected.requires_reconnect());

        assert!(Error::Desynchronized.requires_reconnect());
        assert!(Error::Handshake("no sync".into()).requires_reconnect());
        assert!(Error::Transport(et312_transport::Error::ConnectionClosed).requires_reconnect());
    }
}
