//! ET-312 command and reply codes
//!
//! Framed packets carry their opcode in the low nibble of the header byte
//! (the high nibble is the length). Status replies are single raw bytes and
//! carry no checksum.

use std::fmt;

use crate::error::{Error, Result};

/// Request opcodes (host to box)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Key exchange, payload is the host key fragment
    KeyExchange = 0x0F,

    /// Single-byte memory read, payload is the big-endian address
    Read = 0x0C,

    /// Memory write, payload is the big-endian address followed by data
    Write = 0x0D,
}

impl Command {
    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyExchange => "KEY_EXCHANGE",
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        cmd as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0F => Ok(Self::KeyExchange),
            0x0C => Ok(Self::Read),
            0x0D => Ok(Self::Write),
            _ => Err(Error::UnknownCommand(value)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:X})", self.name(), *self as u8)
    }
}

/// Framed reply opcodes (box to host)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reply {
    /// Answer to [`Command::KeyExchange`], payload is the box key fragment
    KeyExchange = 0x01,

    /// Answer to [`Command::Read`], payload is the byte read
    Read = 0x02,
}

impl Reply {
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyExchange => "KEY_EXCHANGE_REPLY",
            Self::Read => "READ_REPLY",
        }
    }

    /// The reply the box sends for `command`, if it is a framed one
    pub fn for_command(command: Command) -> Option<Self> {
        match command {
            Command::KeyExchange => Some(Self::KeyExchange),
            Command::Read => Some(Self::Read),
            Command::Write => None,
        }
    }
}

impl From<Reply> for u8 {
    fn from(reply: Reply) -> u8 {
        reply as u8
    }
}

impl TryFrom<u8> for Reply {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::KeyExchange),
            0x02 => Ok(Self::Read),
            _ => Err(Error::UnknownCommand(value)),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:X})", self.name(), *self as u8)
    }
}

/// Pack a length and an opcode into a header byte
///
/// Returns `None` when either does not fit its nibble.
pub fn pack_header(length: usize, opcode: u8) -> Option<u8> {
    if length > 0x0F || opcode > 0x0F {
        return None;
    }
    Some(((length as u8) << 4) | opcode)
}

/// Split a header byte into `(length, opcode)`
pub fn unpack_header(header: u8) -> (usize, u8) {
    ((header >> 4) as usize, header & 0x0F)
}
