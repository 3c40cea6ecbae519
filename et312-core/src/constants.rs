//! Protocol constants

/// Byte sent (unobfuscated) to resynchronize with the box
pub const SYNC_BYTE: u8 = 0x00;

/// Sync acknowledgment; the box also answers malformed commands with it
pub const SYNC_ACK: u8 = 0x07;

/// Error reply byte (same value as the sync acknowledgment)
pub const ERROR_REPLY: u8 = SYNC_ACK;

/// Write acknowledgment
pub const WRITE_ACK: u8 = 0x06;

/// Mixed into the key fragments when deriving the session key
pub const KEY_MIX: u8 = 0x55;

/// Number of sync bytes sent before giving up
pub const SYNC_ATTEMPTS: usize = 12;

/// Maximum data bytes in a single write command
pub const MAX_WRITE_LEN: usize = 8;

/// Default response timeout (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Per-attempt timeout while syncing (milliseconds)
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 100;

/// Consecutive decode failures tolerated before the session is considered
/// desynchronized
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Serial line speeds
pub mod baud {
    /// Speed the box starts at after power-on
    pub const DEFAULT: u32 = 19200;

    /// Double speed, selectable after the handshake
    pub const FAST: u32 = 38400;

    /// UBRRL value for a line speed, if the box supports it
    pub fn ubrr_for(rate: u32) -> Option<u8> {
        match rate {
            DEFAULT => Some(0x19),
            FAST => Some(0x0C),
            _ => None,
        }
    }

    /// Line speed selected by a UBRRL value
    pub fn rate_for(ubrr: u8) -> Option<u32> {
        match ubrr {
            0x19 => Some(DEFAULT),
            0x0C => Some(FAST),
            _ => None,
        }
    }
}
