//! ET-312 packet structure and encoding/decoding

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::trace;

use crate::{
    checksum,
    command::{self, Command, Reply},
    error::{Error, Result},
    key::{self, SessionKey},
};

/// ET-312 protocol packet
///
/// # Packet Structure
///
/// ```text
/// ┌──────────────────────┬─────────────┬─────────────┐
/// │        Header        │   Payload   │  Checksum   │
/// │ len (hi) | op (lo)   │   N bytes   │   1 byte    │
/// └──────────────────────┴─────────────┴─────────────┘
/// ```
///
/// `len` counts the header and payload bytes, so it is `N + 1`. The checksum
/// is the low byte of the sum of every byte before it, taken before any
/// obfuscation is applied.
///
/// # Examples
///
/// ```
/// use et312_core::{Command, Packet};
///
/// let packet = Packet::with_payload(Command::Read, vec![0x42, 0x13]);
/// let encoded = packet.encode(None).unwrap();
/// assert_eq!(&encoded[..], &[0x3C, 0x42, 0x13, 0x91]);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Opcode nibble (a [`Command`] or a [`Reply`] depending on direction)
    pub opcode: u8,

    /// Packet payload
    pub payload: Bytes,
}

impl Packet {
    /// Header plus checksum
    pub const OVERHEAD: usize = 2;

    /// Largest value the length nibble can hold
    pub const MAX_LENGTH: usize = 0x0F;

    /// Maximum payload size
    pub const MAX_PAYLOAD_SIZE: usize = Self::MAX_LENGTH - 1;

    /// Create a request packet with empty payload
    pub fn new(command: Command) -> Self {
        Self {
            opcode: command.into(),
            payload: Bytes::new(),
        }
    }

    /// Create a request packet with payload
    pub fn with_payload(command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: command.into(),
            payload: payload.into(),
        }
    }

    /// Create a reply packet (box side)
    pub fn reply(reply: Reply, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: reply.into(),
            payload: payload.into(),
        }
    }

    /// Value of the length nibble
    pub fn length(&self) -> usize {
        1 + self.payload.len()
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        Self::OVERHEAD + self.payload.len()
    }

    /// Header byte for this packet
    pub fn header(&self) -> Result<u8> {
        command::pack_header(self.length(), self.opcode).ok_or(Error::PayloadTooLarge {
            size: self.payload.len(),
            max: Self::MAX_PAYLOAD_SIZE,
        })
    }

    /// Interpret the opcode as a request
    pub fn command(&self) -> Result<Command> {
        Command::try_from(self.opcode)
    }

    /// Interpret the opcode as a reply
    pub fn reply_code(&self) -> Result<Reply> {
        Reply::try_from(self.opcode)
    }

    /// Encode packet to bytes, obfuscating every byte when `key` is given
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload does not fit the
    /// length nibble.
    pub fn encode(&self, key: Option<SessionKey>) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_u8(self.header()?);
        buf.put_slice(&self.payload);
        let checksum = checksum::calculate(&buf);
        buf.put_u8(checksum);

        if let Some(key) = key {
            key::apply(&mut buf, key);
        }

        Ok(buf)
    }

    /// Decode packet from bytes, removing the session key first when given
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer is shorter than header plus checksum
    /// - Length nibble disagrees with the number of bytes
    /// - Checksum verification fails
    pub fn decode(bytes: &[u8], key: Option<SessionKey>) -> Result<Self> {
        if bytes.len() < Self::OVERHEAD {
            return Err(Error::PacketTooShort {
                expected: Self::OVERHEAD,
                actual: bytes.len(),
            });
        }

        let mut buf = BytesMut::from(bytes);
        if let Some(key) = key {
            key::apply(&mut buf, key);
        }

        let (declared, opcode) = command::unpack_header(buf[0]);
        let body_len = buf.len() - 1;
        if declared != body_len {
            return Err(Error::LengthMismatch {
                declared,
                actual: body_len,
            });
        }

        let received = buf[body_len];
        let expected = checksum::calculate(&buf[..body_len]);
        if expected != received {
            return Err(Error::ChecksumMismatch { expected, received });
        }

        buf.truncate(body_len);
        let payload = buf.split_off(1).freeze();

        Ok(Self { opcode, payload })
    }
}

/// Frame a request: header, payload, checksum, then obfuscate with `key`
pub fn frame_command(
    command: Command,
    payload: &[u8],
    key: Option<SessionKey>,
) -> Result<BytesMut> {
    let frame = Packet::with_payload(command, Bytes::copy_from_slice(payload)).encode(key)?;

    trace!(
        command = %command,
        keyed = key.is_some(),
        frame = %hex::encode(&frame),
        "Framed command"
    );

    Ok(frame)
}

/// Parse and validate a framed response
///
/// Never panics on malformed input; every failure is a typed [`Error`].
pub fn parse_response(bytes: &[u8], key: Option<SessionKey>) -> Result<Packet> {
    trace!(frame = %hex::encode(bytes), "Parsing response");
    Packet::decode(bytes, key)
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("opcode", &format!("0x{:X}", self.opcode))
            .field("length", &self.length())
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet[0x{:X}](len={})",
            self.opcode,
            self.length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_frame_read_plain() {
        let frame = frame_command(Command::Read, &[0x42, 0x13], None).unwrap();
        assert_eq!(&frame[..], &[0x3C, 0x42, 0x13, 0x91]);
    }

    #[test]
    fn test_frame_obfuscates_every_byte() {
        let key = SessionKey::from_raw(0xA5);
        let plain = frame_command(Command::Read, &[0x42, 0x13], None).unwrap();
        let keyed = frame_command(Command::Read, &[0x42, 0x13], Some(key)).unwrap();

        let expected: Vec<u8> = plain.iter().map(|b| b ^ 0xA5).collect();
        assert_eq!(&keyed[..], expected.as_slice());
    }

    #[test]
    fn test_frame_write_header() {
        let frame = frame_command(Command::Write, &[0x42, 0x12, 0x07], None).unwrap();
        assert_eq!(frame[0], 0x4D);
        assert_eq!(frame[4], checksum::calculate(&frame[..4]));
    }

    #[test]
    fn test_payload_too_large() {
        let result = frame_command(Command::Write, &[0u8; 15], None);
        assert_eq!(
            result.unwrap_err(),
            Error::PayloadTooLarge { size: 15, max: 14 }
        );
        assert!(frame_command(Command::Write, &[0u8; 14], None).is_ok());
    }

    #[test]
    fn test_parse_read_reply() {
        let packet = parse_response(&[0x22, 0x42, 0x64], None).unwrap();
        assert_eq!(packet.reply_code().unwrap(), Reply::Read);
        assert_eq!(packet.payload.as_ref(), &[0x42]);
    }

    #[test]
    fn test_parse_keyed_request() {
        let key = SessionKey::from_raw(0x3A);
        let frame = frame_command(Command::Write, &[0x40, 0x29, 0x0C], Some(key)).unwrap();
        let packet = parse_response(&frame, Some(key)).unwrap();

        assert_eq!(packet.command().unwrap(), Command::Write);
        assert_eq!(packet.payload.as_ref(), &[0x40, 0x29, 0x0C]);
    }

    #[test]
    fn test_parse_wrong_key_rejected() {
        let frame = frame_command(Command::Read, &[0x42, 0x13], Some(SessionKey::from_raw(0x11))).unwrap();
        assert!(parse_response(&frame, Some(SessionKey::from_raw(0x12))).is_err());
    }

    #[test]
    fn test_packet_too_short() {
        assert_eq!(
            parse_response(&[], None).unwrap_err(),
            Error::PacketTooShort { expected: 2, actual: 0 }
        );
        assert!(matches!(
            parse_response(&[0x22], None),
            Err(Error::PacketTooShort { .. })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        // Header says 3 bytes before the checksum, only 2 arrived
        let result = parse_response(&[0x32, 0x42, 0x74], None);
        assert_eq!(
            result.unwrap_err(),
            Error::LengthMismatch { declared: 3, actual: 2 }
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let result = parse_response(&[0x22, 0x42, 0x65], None);
        assert!(matches!(
            result,
            Err(Error::ChecksumMismatch { expected: 0x64, received: 0x65 })
        ));
    }

    #[test]
    fn test_every_single_bit_flip_rejected() {
        let frame = Packet::reply(Reply::Read, vec![0x42]).encode(None).unwrap();

        for index in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[index] ^= 1 << bit;
                assert!(
                    parse_response(&corrupted, None).is_err(),
                    "flip of bit {} in byte {} accepted",
                    bit,
                    index
                );
            }
        }
    }

    proptest! {
        #[test]
        fn single_byte_corruption_rejected(
            payload in prop::collection::vec(any::<u8>(), 0..=Packet::MAX_PAYLOAD_SIZE),
            index in any::<prop::sample::Index>(),
            delta in 1u8..=255,
            key in prop::option::of(any::<u8>()),
        ) {
            let key = key.map(SessionKey::from_raw);
            let frame = Packet::reply(Reply::Read, payload).encode(key).unwrap();

            let mut corrupted = frame.to_vec();
            let i = index.index(corrupted.len());
            corrupted[i] = corrupted[i].wrapping_add(delta);

            prop_assert!(parse_response(&corrupted, key).is_err());
        }

        #[test]
        fn parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
            let _ = parse_response(&bytes, None);
        }
    }
}
