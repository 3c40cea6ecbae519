//! ET-312 session key
//!
//! The key is agreed once per connection. The host picks a random fragment
//! and sends it in the key exchange; the box answers with its own fragment.
//! Both sides then use `box ^ host ^ 0x55` and XOR every host-to-box byte
//! with it until the box is power-cycled.

use std::fmt;

use crate::constants::KEY_MIX;

/// Single-byte session key
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(u8);

impl SessionKey {
    /// Derive the session key from both key fragments
    ///
    /// # Examples
    ///
    /// ```
    /// use et312_core::SessionKey;
    ///
    /// let key = SessionKey::derive(0x00, 0x00);
    /// assert_eq!(key.value(), 0x55);
    /// ```
    pub fn derive(box_fragment: u8, host_fragment: u8) -> Self {
        Self(box_fragment ^ host_fragment ^ KEY_MIX)
    }

    /// Wrap a key value already known
    pub const fn from_raw(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Overwrite the key with zero
    pub fn zeroize(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// XOR `byte` with the session key
pub fn obfuscate(byte: u8, key: SessionKey) -> u8 {
    byte ^ key.0
}

/// Undo [`obfuscate`]; XOR is its own inverse
pub fn deobfuscate(byte: u8, key: SessionKey) -> u8 {
    obfuscate(byte, key)
}

/// Apply the session key to every byte of `bytes` in place
pub fn apply(bytes: &mut [u8], key: SessionKey) {
    for b in bytes.iter_mut() {
        *b = obfuscate(*b, key);
    }
}
