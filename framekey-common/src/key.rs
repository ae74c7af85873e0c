// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device key parsing.
//!
//! A device key is a 32-byte secret handed over on the command line as 64 hex
//! characters. It is zeroed when dropped and never shown by `Debug`.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Raw key length in bytes.
pub const DEVICE_KEY_LEN: usize = 32;

/// Key length in hex characters.
pub const DEVICE_KEY_HEX_LEN: usize = DEVICE_KEY_LEN * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("device key must be {expected} hex characters (got {found})")]
    Length { expected: usize, found: usize },
    #[error("device key contains invalid hex character {ch:?} at position {index}")]
    InvalidChar { ch: char, index: usize },
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; DEVICE_KEY_LEN]);

/// Validate a hex encoded device key and decode it.
///
/// Length is checked first, in characters, so that the error names what the
/// user actually typed. Only then is every character checked against
/// `[0-9a-fA-F]`.
pub fn validate(key_hex: &str) -> Result<DeviceKey, KeyError> {
    let found = key_hex.chars().count();
    if found != DEVICE_KEY_HEX_LEN {
        return Err(KeyError::Length {
            expected: DEVICE_KEY_HEX_LEN,
            found,
        });
    }

    if let Some((index, ch)) = key_hex
        .chars()
        .enumerate()
        .find(|(_, ch)| !ch.is_ascii_hexdigit())
    {
        return Err(KeyError::InvalidChar { ch, index });
    }

    let mut bytes = [0u8; DEVICE_KEY_LEN];
    hex::decode_to_slice(key_hex, &mut bytes).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            KeyError::InvalidChar { ch: c, index }
        }
        _ => KeyError::Length {
            expected: DEVICE_KEY_HEX_LEN,
            found,
        },
    })?;

    Ok(DeviceKey(bytes))
}

impl DeviceKey {
    pub fn from_bytes(bytes: [u8; DEVICE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_KEY_LEN] {
        &self.0
    }

    /// Lowercase hex form, as the firmware expects it when stored as a string.
    /// The buffer is wiped when dropped.
    pub fn to_hex(&self) -> Zeroizing<[u8; DEVICE_KEY_HEX_LEN]> {
        let mut out = Zeroizing::new([0u8; DEVICE_KEY_HEX_LEN]);
        // output is exactly twice the input, the only way encoding can fail
        let encoded = hex::encode_to_slice(&self.0, &mut out[..]);
        debug_assert!(encoded.is_ok());
        out
    }
}

impl FromStr for DeviceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(..)")
    }
}
