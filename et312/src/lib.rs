//! # et312
//!
//! Rust implementation of the ET-312 serial control protocol.
//!
//! ## Features
//!
//! - Sync and key exchange handshake
//! - Keyed, checksummed memory reads and writes
//! - Baud-rate shifting that is undone on close
//! - Async/await API using Tokio, one request on the wire at a time
//!
//! ## Quick Start
//!
//! ```no_run
//! use et312::{Et312, MemoryAddress, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> et312::Result<()> {
//!     // Serial bridge in front of the box
//!     let mut transport = TcpTransport::new("127.0.0.1", 2001);
//!     transport.connect().await?;
//!
//!     let et312 = Et312::new(transport);
//!     let host_key = et312
//!         .run(|et312| async move { et312.read_memory(MemoryAddress::HOST_KEY).await })
//!         .await?;
//!     println!("Host key: 0x{:02X}", host_key);
//!
//!     Ok(())
//! }
//! ```

mod commands;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;

// Re-exports
pub use config::SessionConfig;
pub use connection::Connection;
pub use device::Et312;
pub use error::{Error, Result};

// Re-export types
pub use et312_core::{ConnectionState, MemoryAddress, SessionKey};
pub use et312_transport::{ByteTransport, TcpTransport};
