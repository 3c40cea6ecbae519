//! Transport layer for the ET-312 protocol
//!
//! The protocol engine talks to the box through [`ByteTransport`], a plain
//! duplex byte channel. Anything satisfying it works: a serial line, a TCP
//! tunnel to a serial server, or an in-memory emulator.

pub mod tcp;
pub mod error;

pub use error::{Error, Result};
pub use tcp::TcpTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

/// Duplex byte channel to a box
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ByteTransport: Send {
    /// Send raw bytes, returning how many were written
    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Receive up to `max_len` bytes
    ///
    /// Waits until `max_len` bytes arrived or the timeout (the transport's
    /// default when `None`) expires, and returns what was read. An empty
    /// buffer means timeout; it is never reported as an error.
    async fn receive(&mut self, max_len: usize, timeout: Option<Duration>) -> Result<BytesMut>;

    /// Change the line speed
    async fn set_speed(&mut self, rate: u32) -> Result<()>;

    /// Current line speed
    fn speed(&self) -> u32;

    /// Release the channel
    async fn close(&mut self) -> Result<()>;

    /// Check if the channel is open
    fn is_open(&self) -> bool;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}
