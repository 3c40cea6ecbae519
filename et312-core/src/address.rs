//! Box memory addresses

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

/// A 16-bit address in the box's address space
///
/// Addresses go on the wire big-endian, high byte first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryAddress(u16);

impl MemoryAddress {
    /// Serial baud-rate register (UBRRL)
    pub const BAUD_RATE: Self = Self(0x4029);

    /// Host key fragment register
    pub const HOST_KEY: Self = Self(0x4212);

    /// Box key fragment register
    pub const BOX_KEY: Self = Self(0x4213);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// Big-endian wire encoding
    pub fn to_be_bytes(self) -> [u8; 2] {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, self.0);
        buf
    }

    /// Decode the first two bytes of `bytes`, if present
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        Some(Self(BigEndian::read_u16(&bytes[..2])))
    }
}

impl From<u16> for MemoryAddress {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<MemoryAddress> for u16 {
    fn from(address: MemoryAddress) -> u16 {
        address.0
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_order() {
        assert_eq!(MemoryAddress::BOX_KEY.to_be_bytes(), [0x42, 0x13]);
        assert_eq!(MemoryAddress::from_be_slice(&[0x40, 0x29, 0xFF]), Some(MemoryAddress::BAUD_RATE));
        assert_eq!(MemoryAddress::from_be_slice(&[0x40]), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryAddress::HOST_KEY.to_string(), "0x4212");
    }
}
