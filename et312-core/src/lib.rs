//! # et312-core
//!
//! Core protocol implementation for the ET-312 serial control protocol.
//!
//! This crate provides the low-level protocol primitives:
//! - Packet structure and encoding/decoding
//! - Checksum calculation
//! - Session key derivation and obfuscation
//! - Command definitions
//! - Protocol constants

pub mod address;
pub mod checksum;
pub mod command;
pub mod constants;
pub mod error;
pub mod key;
pub mod packet;
pub mod session;

pub use address::MemoryAddress;
pub use command::{Command, Reply};
pub use error::{Error, Result};
pub use key::{deobfuscate, obfuscate, SessionKey};
pub use packet::{frame_command, parse_response, Packet};
pub use session::{ConnectionState, Session};
