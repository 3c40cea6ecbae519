//! In-memory ET-312 box emulator
//!
//! Implements [`ByteTransport`](et312_transport::ByteTransport) so the
//! protocol engine can be driven without hardware. Only the wire contract is
//! modelled: sync, key exchange, keyed reads and writes, and the baud-rate
//! register.

pub mod emulator;

pub use emulator::{Emulator, EmulatorHandle};
