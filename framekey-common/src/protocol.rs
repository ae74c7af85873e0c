// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! ESP32 ROM serial loader packets.
//!
//! Requests are `0x00, opcode, len u16, checksum u32, data`. Responses are
//! `0x01, opcode, len u16, value u32, data`, where the last four data bytes
//! of an ESP32 ROM response carry the status. Both travel SLIP framed, see
//! [`crate::slip`].

use core::time::Duration;

use heapless::Vec as HeaplessVec;
use thiserror::Error;

// --- Loader constants ---

pub const DIRECTION_REQUEST: u8 = 0x00;
pub const DIRECTION_RESPONSE: u8 = 0x01;

/// Baud rate the ROM loader starts at.
pub const ROM_BAUD: u32 = 115_200;

/// Flash data block size accepted by the ROM (the stub would take 16 KiB).
pub const FLASH_WRITE_SIZE: usize = 0x400;

/// Maximum bytes returned by one `READ_FLASH_SLOW`.
pub const READ_FLASH_BLOCK_SIZE: usize = 64;

pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_BLOCK_SIZE: u32 = 64 * 1024;
pub const FLASH_PAGE_SIZE: u32 = 256;
pub const DEFAULT_FLASH_SIZE: u32 = 4 * 1024 * 1024;

pub const CHECKSUM_SEED: u8 = 0xEF;

/// Status trailer length on ESP32 ROM responses.
pub const STATUS_LEN: usize = 4;

const HEADER_LEN: usize = 8;
const FLASH_DATA_HEADER_LEN: usize = 16;

/// Largest request packet before SLIP framing.
pub const MAX_REQUEST_LEN: usize = HEADER_LEN + FLASH_DATA_HEADER_LEN + FLASH_WRITE_SIZE;

/// Sync payload: `07 07 12 20` followed by 32 bytes of `0x55`.
pub const SYNC_PAYLOAD: [u8; 36] = {
    let mut payload = [0x55u8; 36];
    payload[0] = 0x07;
    payload[1] = 0x07;
    payload[2] = 0x12;
    payload[3] = 0x20;
    payload
};

// --- Timeouts ---

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(100);
const ERASE_TIMEOUT_PER_MB_MS: u64 = 30_000;
const WRITE_TIMEOUT_PER_MB_MS: u64 = 40_000;

fn timeout_per_mb(per_mb_ms: u64, size: u64) -> Duration {
    let ms = per_mb_ms * size / (1024 * 1024);
    Duration::from_millis(ms).max(DEFAULT_TIMEOUT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    FlashBegin = 0x02,
    FlashData = 0x03,
    FlashEnd = 0x04,
    Sync = 0x08,
    SpiSetParams = 0x0B,
    SpiAttach = 0x0D,
    ReadFlashSlow = 0x0E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Sync,
    /// Attach the default SPI flash pins.
    SpiAttach,
    SpiSetParams {
        total_size: u32,
    },
    /// Erase `size` bytes at `offset` and expect `blocks` data packets.
    FlashBegin {
        size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
    },
    /// One block, padded with `0xFF` to [`FLASH_WRITE_SIZE`] on the wire.
    FlashData {
        seq: u32,
        data: &'a [u8],
    },
    FlashEnd {
        reboot: bool,
    },
    ReadFlashSlow {
        offset: u32,
        len: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RomError {
    #[error("invalid message")]
    InvalidMessage,
    #[error("failed to act on message")]
    FailedToAct,
    #[error("invalid CRC in message")]
    InvalidCrc,
    #[error("flash write error")]
    FlashWrite,
    #[error("flash read error")]
    FlashRead,
    #[error("flash read length error")]
    ReadLength,
    #[error("deflate error")]
    Deflate,
    #[error("unknown error 0x{0:02x}")]
    Unknown(u8),
}

impl From<u8> for RomError {
    fn from(code: u8) -> Self {
        match code {
            0x05 => Self::InvalidMessage,
            0x06 => Self::FailedToAct,
            0x07 => Self::InvalidCrc,
            0x08 => Self::FlashWrite,
            0x09 => Self::FlashRead,
            0x0A => Self::ReadLength,
            0x0B => Self::Deflate,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("response too short ({0} bytes)")]
    TooShort(usize),
    #[error("unexpected direction byte 0x{0:02x}")]
    Direction(u8),
    #[error("response declares {expected} data bytes, got {found}")]
    Truncated { expected: usize, found: usize },
    #[error("response has no status bytes")]
    MissingStatus,
    #[error("device reported {0}")]
    Rom(RomError),
    #[error("flash block of {0} bytes exceeds the {max} byte limit", max = FLASH_WRITE_SIZE)]
    BlockTooLarge(usize),
}

/// XOR checksum of a flash data payload, seeded with `0xEF`.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b) as u32
}

impl Command<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Sync => Opcode::Sync,
            Command::SpiAttach => Opcode::SpiAttach,
            Command::SpiSetParams { .. } => Opcode::SpiSetParams,
            Command::FlashBegin { .. } => Opcode::FlashBegin,
            Command::FlashData { .. } => Opcode::FlashData,
            Command::FlashEnd { .. } => Opcode::FlashEnd,
            Command::ReadFlashSlow { .. } => Opcode::ReadFlashSlow,
        }
    }

    /// How long to wait for the response.
    pub fn timeout(&self) -> Duration {
        match self {
            Command::Sync => SYNC_TIMEOUT,
            Command::FlashBegin { size, .. } => {
                timeout_per_mb(ERASE_TIMEOUT_PER_MB_MS, *size as u64)
            }
            Command::FlashData { .. } => {
                timeout_per_mb(WRITE_TIMEOUT_PER_MB_MS, FLASH_WRITE_SIZE as u64)
            }
            _ => DEFAULT_TIMEOUT,
        }
    }

    /// Build the request packet (without SLIP framing).
    pub fn encode(&self) -> Result<HeaplessVec<u8, MAX_REQUEST_LEN>, ProtocolError> {
        let mut body: HeaplessVec<u8, MAX_REQUEST_LEN> = HeaplessVec::new();
        let mut check = 0u32;

        match *self {
            Command::Sync => push(&mut body, &SYNC_PAYLOAD),
            Command::SpiAttach => push(&mut body, &[0u8; 8]),
            Command::SpiSetParams { total_size } => {
                for word in [
                    0, // flash id
                    total_size,
                    FLASH_BLOCK_SIZE,
                    FLASH_SECTOR_SIZE,
                    FLASH_PAGE_SIZE,
                    0xFFFF, // status mask
                ] {
                    push(&mut body, &word.to_le_bytes());
                }
            }
            Command::FlashBegin {
                size,
                blocks,
                block_size,
                offset,
            } => {
                for word in [size, blocks, block_size, offset] {
                    push(&mut body, &word.to_le_bytes());
                }
            }
            Command::FlashData { seq, data } => {
                if data.len() > FLASH_WRITE_SIZE {
                    return Err(ProtocolError::BlockTooLarge(data.len()));
                }
                for word in [FLASH_WRITE_SIZE as u32, seq, 0, 0] {
                    push(&mut body, &word.to_le_bytes());
                }
                push(&mut body, data);
                body.resize(FLASH_DATA_HEADER_LEN + FLASH_WRITE_SIZE, 0xFF)
                    .ok();
                check = checksum(&body[FLASH_DATA_HEADER_LEN..]);
            }
            Command::FlashEnd { reboot } => {
                // 0 reboots, 1 stays in the loader
                push(&mut body, &(u32::from(!reboot)).to_le_bytes());
            }
            Command::ReadFlashSlow { offset, len } => {
                for word in [offset, len] {
                    push(&mut body, &word.to_le_bytes());
                }
            }
        }

        let mut packet = HeaplessVec::new();
        push(&mut packet, &[DIRECTION_REQUEST, self.opcode() as u8]);
        push(&mut packet, &(body.len() as u16).to_le_bytes());
        push(&mut packet, &check.to_le_bytes());
        push(&mut packet, &body);
        Ok(packet)
    }
}

// Capacity is sized for the largest request, so this cannot overflow.
fn push(buf: &mut HeaplessVec<u8, MAX_REQUEST_LEN>, bytes: &[u8]) {
    buf.extend_from_slice(bytes).ok();
}

/// A decoded loader response, borrowing the frame it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    pub opcode: u8,
    pub value: u32,
    pub data: &'a [u8],
}

impl<'a> Response<'a> {
    pub fn parse(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort(frame.len()));
        }
        if frame[0] != DIRECTION_RESPONSE {
            return Err(ProtocolError::Direction(frame[0]));
        }
        let size = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        let found = frame.len() - HEADER_LEN;
        if found < size {
            return Err(ProtocolError::Truncated {
                expected: size,
                found,
            });
        }
        Ok(Self {
            opcode: frame[1],
            value: u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]),
            data: &frame[HEADER_LEN..HEADER_LEN + size],
        })
    }

    /// Check the status trailer.
    pub fn status(&self) -> Result<(), ProtocolError> {
        if self.data.len() < STATUS_LEN {
            return Err(ProtocolError::MissingStatus);
        }
        let status = &self.data[self.data.len() - STATUS_LEN..];
        if status[0] != 0 {
            return Err(ProtocolError::Rom(RomError::from(status[1])));
        }
        Ok(())
    }

    /// Data bytes before the status trailer.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[..self.data.len().saturating_sub(STATUS_LEN)]
    }
}
