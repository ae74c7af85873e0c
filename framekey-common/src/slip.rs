// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SLIP (RFC 1055) framing as used by the ESP ROM serial loader.
//!
//! Every packet starts and ends with `END`. Payload bytes equal to `END` or
//! `ESC` are replaced by two-byte escape sequences.

#[cfg(feature = "std")]
use alloc::vec::Vec;

use heapless::Vec as HeaplessVec;
use thiserror::Error;

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlipError {
    #[error("invalid SLIP escape 0xdb 0x{0:02x}")]
    InvalidEscape(u8),
    #[error("SLIP frame truncated after escape byte")]
    Truncated,
    #[error("SLIP frame exceeds buffer")]
    Overflow,
}

/// SLIP encode data into a heapless Vec (for no_std).
///
/// The output includes the leading and trailing `END` delimiters.
pub fn encode_heapless<const N: usize>(data: &[u8]) -> Result<HeaplessVec<u8, N>, SlipError> {
    let mut output = HeaplessVec::new();
    output.push(END).map_err(|_| SlipError::Overflow)?;
    for &byte in data {
        let escaped: &[u8] = match byte {
            END => &[ESC, ESC_END],
            ESC => &[ESC, ESC_ESC],
            _ => core::slice::from_ref(&byte),
        };
        output
            .extend_from_slice(escaped)
            .map_err(|_| SlipError::Overflow)?;
    }
    output.push(END).map_err(|_| SlipError::Overflow)?;
    Ok(output)
}

/// SLIP decode one frame body into a heapless Vec (for no_std).
///
/// Leading and trailing `END` bytes are skipped.
pub fn decode_heapless<const N: usize>(data: &[u8]) -> Result<HeaplessVec<u8, N>, SlipError> {
    let mut output = HeaplessVec::new();
    let mut decoder = Decoder::new();
    for &byte in data {
        if let Some(b) = decoder.feed(byte)? {
            output.push(b).map_err(|_| SlipError::Overflow)?;
        }
    }
    decoder.finish()?;
    Ok(output)
}

#[cfg(feature = "std")]
/// SLIP encode data into a Vec (for std).
///
/// The output includes the leading and trailing `END` delimiters.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 8 + 2);
    output.push(END);
    for &byte in data {
        match byte {
            END => output.extend_from_slice(&[ESC, ESC_END]),
            ESC => output.extend_from_slice(&[ESC, ESC_ESC]),
            _ => output.push(byte),
        }
    }
    output.push(END);
    output
}

#[cfg(feature = "std")]
/// SLIP decode one frame body into a Vec (for std).
pub fn decode(data: &[u8]) -> Result<Vec<u8>, SlipError> {
    let mut output = Vec::with_capacity(data.len());
    let mut decoder = Decoder::new();
    for &byte in data {
        if let Some(b) = decoder.feed(byte)? {
            output.push(b);
        }
    }
    decoder.finish()?;
    Ok(output)
}

/// Byte-at-a-time unescaper, for reading frames straight off a serial port.
#[derive(Debug, Default)]
pub struct Decoder {
    escaped: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw byte. Returns the decoded byte, or `None` for `END` and
    /// the first half of an escape sequence.
    pub fn feed(&mut self, byte: u8) -> Result<Option<u8>, SlipError> {
        if self.escaped {
            self.escaped = false;
            return match byte {
                ESC_END => Ok(Some(END)),
                ESC_ESC => Ok(Some(ESC)),
                other => Err(SlipError::InvalidEscape(other)),
            };
        }
        match byte {
            END => Ok(None),
            ESC => {
                self.escaped = true;
                Ok(None)
            }
            _ => Ok(Some(byte)),
        }
    }

    /// Fails if the frame ended in the middle of an escape sequence.
    pub fn finish(&self) -> Result<(), SlipError> {
        if self.escaped {
            Err(SlipError::Truncated)
        } else {
            Ok(())
        }
    }
}
