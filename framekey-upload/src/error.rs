// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error types for the key writer.
//!
//! Every failure after validation names the [`Stage`] that was reached, so
//! the operator knows whether the partition may have been touched.

use std::fmt;
use std::io;

use framekey_common::key::KeyError;
use framekey_common::nvs::NvsError;
use framekey_common::protocol::ProtocolError;
use framekey_common::slip::SlipError;
use thiserror::Error;

/// How far a write got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Reset,
    Sync,
    Attach,
    Erase,
    Write { block: u32 },
    Finish,
    Verify,
    HardReset,
}

impl Stage {
    /// True once flash contents may have changed.
    pub fn touches_flash(&self) -> bool {
        matches!(
            self,
            Stage::Erase | Stage::Write { .. } | Stage::Finish | Stage::Verify | Stage::HardReset
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Open => f.write_str("opening port"),
            Stage::Reset => f.write_str("reset into bootloader"),
            Stage::Sync => f.write_str("sync"),
            Stage::Attach => f.write_str("flash attach"),
            Stage::Erase => f.write_str("erase"),
            Stage::Write { block } => write!(f, "write block {}", block),
            Stage::Finish => f.write_str("finish"),
            Stage::Verify => f.write_str("verify"),
            Stage::HardReset => f.write_str("hard reset"),
        }
    }
}

/// Low level failures talking to the ROM loader.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out waiting for response")]
    Timeout,
    #[error("serial I/O error")]
    Io(#[from] io::Error),
    #[error("malformed frame")]
    Slip(#[from] SlipError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no response to command 0x{0:02x}")]
    NoMatchingResponse(u8),
    #[error("short read: expected {expected} bytes, got {found}")]
    ShortRead { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Layout(#[from] NvsError),
    #[error("partition 0x{offset:x}..0x{end:x} does not fit in 0x{flash_size:x} bytes of flash")]
    OutOfFlash {
        offset: u32,
        end: u64,
        flash_size: u32,
    },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{stage} failed")]
    Flash {
        stage: Stage,
        #[source]
        source: TransportError,
    },
    #[error("read-back mismatch at 0x{address:08x}: wrote 0x{expected:02x}, read 0x{found:02x}")]
    Mismatch {
        address: u32,
        expected: u8,
        found: u8,
    },
}

#[derive(Debug, Error)]
pub enum WriteKeyError {
    #[error("invalid input")]
    Validation(#[from] ValidationError),
    #[error("cannot open serial port {port}")]
    Connection {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("no response from bootloader during {stage}")]
    Handshake {
        stage: Stage,
        #[source]
        source: TransportError,
    },
    #[error("flash write failed")]
    Write(#[from] WriteError),
}

impl WriteKeyError {
    pub fn handshake(stage: Stage, source: TransportError) -> Self {
        Self::Handshake { stage, source }
    }

    pub fn flash(stage: Stage, source: TransportError) -> Self {
        Self::Write(WriteError::Flash { stage, source })
    }

    /// Stage reached when the error happened, if past validation.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validation(_) => None,
            Self::Connection { .. } => Some(Stage::Open),
            Self::Handshake { stage, .. } => Some(*stage),
            Self::Write(WriteError::Flash { stage, .. }) => Some(*stage),
            Self::Write(WriteError::Mismatch { .. }) => Some(Stage::Verify),
        }
    }
}

impl From<KeyError> for WriteKeyError {
    fn from(e: KeyError) -> Self {
        Self::Validation(e.into())
    }
}

impl From<NvsError> for WriteKeyError {
    fn from(e: NvsError) -> Self {
        Self::Validation(e.into())
    }
}
