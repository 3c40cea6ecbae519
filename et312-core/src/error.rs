//! Error types for et312-core

/// Result type alias for et312 codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Packet is too short to be valid
    #[error("Packet too short: expected at least {expected} bytes, got {actual} bytes")]
    PacketTooShort {
        expected: usize,
        actual: usize,
    },

    /// Declared length nibble disagrees with the bytes received
    #[error("Length mismatch: header declares {declared} bytes, received {actual} bytes")]
    LengthMismatch {
        declared: usize,
        actual: usize,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch {
        expected: u8,
        received: u8,
    },

    /// Unknown command or reply nibble
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Valid packet, but not the reply the request calls for
    #[error("Unexpected reply: expected {expected}, got 0x{actual:02X}")]
    UnexpectedReply {
        expected: &'static str,
        actual: u8,
    },

    /// Box answered with its generic error byte
    #[error("Device rejected the command")]
    DeviceRejected,

    /// Payload does not fit the length nibble
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),
}

impl Error {
    /// Framing errors: the bytes do not form a packet of the declared shape
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. } | Self::LengthMismatch { .. }
        )
    }

    /// Check if error is recoverable (retrying the same command might succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. }
                | Self::LengthMismatch { .. }
                | Self::ChecksumMismatch { .. }
                | Self::UnexpectedReply { .. }
                | Self::UnknownCommand(_)
                | Self::DeviceRejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_classification() {
        assert!(Error::PacketTooShort { expected: 2, actual: 0 }.is_framing());
        assert!(Error::LengthMismatch { declared: 3, actual: 2 }.is_framing());
        assert!(!Error::ChecksumMismatch { expected: 1, received: 2 }.is_framing());
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::ChecksumMismatch { expected: 1, received: 2 }.is_recoverable());
        assert!(Error::DeviceRejected.is_recoverable());
        assert!(!Error::PayloadTooLarge { size: 20, max: 14 }.is_recoverable());
        assert!(!Error::InvalidSessionState("closed".into()).is_recoverable());
    }
}
