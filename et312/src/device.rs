//! High-level box interface

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use et312_core::{ConnectionState, MemoryAddress, Session, SessionKey};
use et312_transport::ByteTransport;

use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};

/// ET-312 box
///
/// High-level interface for talking to one box. Clones share the same
/// session; concurrent calls queue on an internal lock, so only one
/// request is ever on the wire.
///
/// # Examples
///
/// ```no_run
/// use et312::{Et312, MemoryAddress, TcpTransport};
///
/// #[tokio::main]
/// async fn main() -> et312::Result<()> {
///     let mut transport = TcpTransport::new("127.0.0.1", 2001);
///     transport.connect().await?;
///
///     let et312 = Et312::new(transport);
///     et312.connect().await?;
///
///     let box_key = et312.read_memory(MemoryAddress::BOX_KEY).await?;
///     println!("Box key: 0x{:02X}", box_key);
///
///     et312.close().await?;
///     Ok(())
/// }
/// ```
pub struct Et312<T: ByteTransport> {
    connection: Arc<Mutex<Connection<T>>>,
    session: Session,
}

impl<T: ByteTransport> Et312<T> {
    /// Wrap a transport with default settings
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        let connection = Connection::with_config(transport, config);
        let session = connection.session().clone();

        Self {
            connection: Arc::new(Mutex::new(connection)),
            session,
        }
    }

    /// Current state; does not wait for an in-flight request
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Session key, present only while connected
    pub fn key(&self) -> Option<SessionKey> {
        self.session.key()
    }

    /// Synchronize with the box and agree on a session key
    pub async fn connect(&self) -> Result<()> {
        self.connection.lock().await.connect().await
    }

    /// Read one byte of box memory
    pub async fn read_memory(&self, address: MemoryAddress) -> Result<u8> {
        self.ensure_connected()?;
        self.connection.lock().await.read_memory(address).await
    }

    /// Write one byte of box memory
    pub async fn write_memory(&self, address: MemoryAddress, value: u8) -> Result<()> {
        self.ensure_connected()?;
        self.connection.lock().await.write_memory(address, value).await
    }

    /// Write up to eight consecutive bytes
    pub async fn write_block(&self, address: MemoryAddress, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.connection.lock().await.write_block(address, data).await
    }

    /// Switch the box and the transport to another line speed
    pub async fn change_baud_rate(&self, rate: u32) -> Result<()> {
        self.connection.lock().await.change_baud_rate(rate).await
    }

    /// Restore the line speed, zero the key and release the transport
    pub async fn close(&self) -> Result<()> {
        self.connection.lock().await.close().await
    }

    /// Connect, run `f`, and close again whatever `f` returns
    ///
    /// The close runs on success and failure alike, so the box is put back
    /// at its original speed and the key is zeroed before this returns.
    pub async fn run<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if let Err(e) = self.connect().await {
            if let Err(close_err) = self.close().await {
                warn!(error = %close_err, "Close after failed connect also failed");
            }
            return Err(e);
        }

        let outcome = f(self.clone()).await;
        let closed = self.close().await;

        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Close after failed session also failed");
                Err(e)
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }
}

impl<T: ByteTransport> Clone for Et312<T> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            session: self.session.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use et312_emulator::Emulator;

    #[test]
    fn test_et312_create() {
        let et312 = Et312::new(Emulator::new());
        assert!(!et312.is_connected());
        assert_eq!(et312.state(), ConnectionState::Disconnected);
        assert!(et312.key().is_none());
    }

    #[tokio::test]
    async fn test_connect_and_close() {
        let emulator = Emulator::new();
        let handle = emulator.handle();
        let et312 = Et312::new(emulator);

        et312.connect().await.unwrap();
        assert!(et312.is_connected());
        assert_eq!(et312.key(), handle.key());

        et312.close().await.unwrap();
        assert_eq!(et312.state(), ConnectionState::Closed);
        assert!(et312.key().is_none());
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_clones_share_session() {
        let et312 = Et312::new(Emulator::new());
        let other = et312.clone();

        et312.connect().await.unwrap();
        assert!(other.is_connected());
        assert!(other.read_memory(MemoryAddress::HOST_KEY).await.is_ok());
    }
}
