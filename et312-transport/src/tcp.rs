//! TCP transport
//!
//! Talks to a box through a serial-to-TCP bridge (ser2net and similar). The
//! bridge owns the physical line, so speed changes are recorded here and
//! have to be mirrored on the bridge side.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use et312_core::constants::baud;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

use crate::{error::*, ByteTransport};

/// TCP transport to a serial bridge
pub struct TcpTransport {
    addr: String,
    port: u16,
    socket_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    read_timeout: Duration,
    speed: u32,
}

impl TcpTransport {
    /// Create new TCP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket_addr: None,
            stream: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(1),
            speed: baud::DEFAULT,
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set default read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the line speed the bridge is configured for
    pub fn with_speed(mut self, rate: u32) -> Self {
        self.speed = rate;
        self
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.socket_addr {
            return Ok(addr);
        }

        let addr_str = format!("{}:{}", self.addr, self.port);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .collect();

        let addr = addrs
            .first()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        self.socket_addr = Some(*addr);
        Ok(*addr)
    }

    /// Open the TCP stream to the bridge
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let addr = self.resolve_addr().await?;

        debug!("Connecting to {}...", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        // Single-byte sync probes must not sit in Nagle's buffer
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        self.stream = Some(stream);
        Ok(())
    }
}

#[async_trait]
impl ByteTransport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes: {}", data.len(), hex::encode(data));

        stream.write_all(data).await?;
        stream.flush().await?;

        Ok(data.len())
    }

    async fn receive(&mut self, max_len: usize, timeout_override: Option<Duration>) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let deadline = Instant::now() + timeout_override.unwrap_or(self.read_timeout);
        let mut buf = BytesMut::with_capacity(max_len);

        // Serial semantics: keep reading until the requested count or the deadline
        while buf.len() < max_len {
            let mut chunk = vec![0u8; max_len - buf.len()];
            let remaining = deadline.saturating_duration_since(Instant::now());

            match timeout(remaining, stream.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    warn!("Bridge closed the connection");
                    return Err(Error::ConnectionClosed);
                }
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(Error::Io(e)),
            }
        }

        trace!("Received {} of {} bytes: {}", buf.len(), max_len, hex::encode(&buf));

        Ok(buf)
    }

    async fn set_speed(&mut self, rate: u32) -> Result<()> {
        debug!("Line speed {} -> {} (bridge must follow)", self.speed, rate);
        self.speed = rate;
        Ok(())
    }

    fn speed(&self) -> u32 {
        self.speed
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Disconnecting from {}...", self.describe());

            // Graceful shutdown
            let _ = stream.shutdown().await;
        }

        self.socket_addr = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }

    fn describe(&self) -> String {
        self.socket_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", self.addr, self.port))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("TCP transport dropped while still connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport_create() {
        let transport = TcpTransport::new("127.0.0.1", 2001);
        assert!(!transport.is_open());
        assert_eq!(transport.speed(), baud::DEFAULT);
        assert_eq!(transport.describe(), "127.0.0.1:2001");
    }

    #[tokio::test]
    async fn test_tcp_transport_invalid_address() {
        let mut transport = TcpTransport::new("invalid..address", 2001)
            .with_connect_timeout(Duration::from_millis(100));

        let result = transport.connect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = TcpTransport::new("127.0.0.1", 2001);
        assert!(matches!(transport.send(&[0x00]).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect().await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();

        let received = transport
            .receive(1, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(received.is_empty());

        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_receive_collects_split_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        transport.send(&[0x3C, 0x42, 0x13, 0x91]).await.unwrap();
        let mut request = [0u8; 4];
        peer.read_exact(&mut request).await.unwrap();
        assert_eq!(request, [0x3C, 0x42, 0x13, 0x91]);

        peer.write_all(&[0x22]).await.unwrap();
        peer.flush().await.unwrap();
        peer.write_all(&[0x42, 0x64]).await.unwrap();

        let reply = transport
            .receive(3, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(&reply[..], &[0x22, 0x42, 0x64]);

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_speed_is_recorded() {
        let mut transport = TcpTransport::new("127.0.0.1", 2001);
        transport.set_speed(baud::FAST).await.unwrap();
        assert_eq!(transport.speed(), baud::FAST);
    }
}
