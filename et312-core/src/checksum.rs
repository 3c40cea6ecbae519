//! ET-312 checksum algorithm
//!
//! Every framed packet ends in a single byte holding the low 8 bits of the
//! sum of all bytes before it. The sum is always taken over the plain
//! (unobfuscated) bytes.

use tracing::trace;

/// Calculate the ET-312 checksum of `bytes`
///
/// # Algorithm
///
/// ```text
/// 1. Sum every byte as an unsigned integer
/// 2. Keep the low 8 bits
/// ```
///
/// # Examples
///
/// ```
/// use et312_core::checksum;
///
/// // Read request for 0x4213: [0x3C, 0x42, 0x13]
/// assert_eq!(checksum::calculate(&[0x3C, 0x42, 0x13]), 0x91);
/// ```
pub fn calculate(bytes: &[u8]) -> u8 {
    let checksum = bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b));

    trace!(
        len = bytes.len(),
        checksum = format!("0x{:02X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Verify checksum
pub fn verify(bytes: &[u8], expected: u8) -> bool {
    calculate(bytes) == expected
}
