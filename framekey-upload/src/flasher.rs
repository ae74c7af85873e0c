// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Writing an image to flash through the ESP32 ROM loader.
//!
//! Sequence: reset into the loader, sync, attach SPI flash, erase and write
//! in 1 KiB blocks, leave flash mode, read the region back, reset.

use std::time::Duration;

use clap::ValueEnum;
use framekey_common::protocol::{
    Command, DEFAULT_FLASH_SIZE, FLASH_WRITE_SIZE, READ_FLASH_BLOCK_SIZE,
};

use crate::error::{Stage, TransportError, ValidationError, WriteError, WriteKeyError};
use crate::transport::{SerialLink, Transport};

/// Reset attempts before giving up on the handshake.
const CONNECT_ATTEMPTS: usize = 7;

/// Sync requests per reset attempt.
const SYNC_ATTEMPTS: usize = 5;

/// EN low time for the reset pulses.
const RESET_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BeforeReset {
    /// Toggle DTR/RTS to enter the ROM loader
    #[default]
    DefaultReset,
    /// Assume the chip is already in the ROM loader
    NoReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AfterReset {
    /// Pulse RTS to boot the application
    #[default]
    HardReset,
    /// Stay in the ROM loader
    NoReset,
}

#[derive(Debug, Clone, Copy)]
pub struct FlashOptions {
    pub offset: u32,
    pub flash_size: u32,
    pub before: BeforeReset,
    pub after: AfterReset,
    pub reset_delay: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            offset: framekey_common::NVS_DEFAULT_OFFSET,
            flash_size: DEFAULT_FLASH_SIZE,
            before: BeforeReset::default(),
            after: AfterReset::default(),
            reset_delay: RESET_DELAY,
        }
    }
}

impl FlashOptions {
    /// Check that `len` bytes at the offset fit in flash.
    pub fn check_fits(&self, len: usize) -> Result<(), ValidationError> {
        let end = self.offset as u64 + len as u64;
        if end > self.flash_size as u64 {
            return Err(ValidationError::OutOfFlash {
                offset: self.offset,
                end,
                flash_size: self.flash_size,
            });
        }
        Ok(())
    }
}

/// Progress callback: stage, bytes done, bytes total.
pub type Progress<'a> = &'a mut dyn FnMut(Stage, usize, usize);

/// A synced connection to the ROM loader.
pub struct Flasher<L: SerialLink> {
    transport: Transport<L>,
    options: FlashOptions,
}

impl<L: SerialLink> Flasher<L> {
    /// Reset the chip into the loader (unless told not to) and sync.
    pub fn connect(link: L, options: FlashOptions) -> Result<Self, WriteKeyError> {
        let mut transport = Transport::new(link);
        let mut last_error = TransportError::Timeout;

        for attempt in 1..=CONNECT_ATTEMPTS {
            tracing::debug!(attempt, "connecting to ROM loader");
            if options.before == BeforeReset::DefaultReset {
                transport
                    .reset_into_loader(options.reset_delay)
                    .map_err(|e| WriteKeyError::handshake(Stage::Reset, e.into()))?;
            }
            // boot banner
            transport
                .link_mut()
                .discard_input()
                .map_err(|e| WriteKeyError::handshake(Stage::Reset, e.into()))?;

            for _ in 0..SYNC_ATTEMPTS {
                match transport.command(&Command::Sync) {
                    Ok(_) => {
                        // the ROM answers one sync several times
                        transport.drain_rx();
                        tracing::info!(attempt, "synced with ROM loader");
                        return Ok(Self { transport, options });
                    }
                    Err(e) => {
                        tracing::trace!(error = %e, "sync failed");
                        last_error = e;
                    }
                }
            }
        }

        Err(WriteKeyError::handshake(Stage::Sync, last_error))
    }

    /// Attach SPI flash and tell the ROM its geometry.
    pub fn attach(&mut self) -> Result<(), WriteKeyError> {
        self.transport
            .command(&Command::SpiAttach)
            .map_err(|e| WriteKeyError::handshake(Stage::Attach, e))?;
        self.transport
            .command(&Command::SpiSetParams {
                total_size: self.options.flash_size,
            })
            .map_err(|e| WriteKeyError::handshake(Stage::Attach, e))?;
        tracing::info!(flash_size = self.options.flash_size, "flash attached");
        Ok(())
    }

    /// Erase the region and write `image` in ROM sized blocks.
    pub fn write(&mut self, image: &[u8], progress: Progress) -> Result<(), WriteKeyError> {
        let blocks = image.len().div_ceil(FLASH_WRITE_SIZE) as u32;

        tracing::info!(
            offset = self.options.offset,
            size = image.len(),
            blocks,
            "erasing"
        );
        self.transport
            .command(&Command::FlashBegin {
                size: image.len() as u32,
                blocks,
                block_size: FLASH_WRITE_SIZE as u32,
                offset: self.options.offset,
            })
            .map_err(|e| WriteKeyError::flash(Stage::Erase, e))?;

        let mut written = 0;
        for (seq, chunk) in image.chunks(FLASH_WRITE_SIZE).enumerate() {
            let seq = seq as u32;
            self.transport
                .command(&Command::FlashData { seq, data: chunk })
                .map_err(|e| WriteKeyError::flash(Stage::Write { block: seq }, e))?;
            written += chunk.len();
            progress(Stage::Write { block: seq }, written, image.len());
        }

        self.transport
            .command(&Command::FlashEnd { reboot: false })
            .map_err(|e| WriteKeyError::flash(Stage::Finish, e))?;
        tracing::info!(written, "write finished");
        Ok(())
    }

    /// Read the region back and compare it with `image`.
    pub fn verify(&mut self, image: &[u8], progress: Progress) -> Result<(), WriteKeyError> {
        let mut address = self.options.offset;
        let mut checked = 0;

        for expected in image.chunks(READ_FLASH_BLOCK_SIZE) {
            let (_, found) = self
                .transport
                .command(&Command::ReadFlashSlow {
                    offset: address,
                    len: expected.len() as u32,
                })
                .map_err(|e| WriteKeyError::flash(Stage::Verify, e))?;

            if found.len() < expected.len() {
                return Err(WriteKeyError::flash(
                    Stage::Verify,
                    TransportError::ShortRead {
                        expected: expected.len(),
                        found: found.len(),
                    },
                ));
            }
            if let Some(i) = expected.iter().zip(&found).position(|(a, b)| a != b) {
                return Err(WriteError::Mismatch {
                    address: address + i as u32,
                    expected: expected[i],
                    found: found[i],
                }
                .into());
            }

            address += expected.len() as u32;
            checked += expected.len();
            progress(Stage::Verify, checked, image.len());
        }

        tracing::info!(checked, "read-back verified");
        Ok(())
    }

    /// Leave the loader according to the `after` option.
    pub fn finish(mut self) -> Result<(), WriteKeyError> {
        if self.options.after == AfterReset::HardReset {
            self.transport
                .hard_reset(self.options.reset_delay)
                .map_err(|e| WriteKeyError::flash(Stage::HardReset, e.into()))?;
            tracing::info!("hard reset");
        }
        Ok(())
    }
}

/// Write `image` to the partition and verify it.
///
/// The link is consumed and closed on every path out of here. Nothing is
/// retried once the erase has been issued.
pub fn transmit<L: SerialLink>(
    link: L,
    image: &[u8],
    options: FlashOptions,
    progress: Progress,
) -> Result<(), WriteKeyError> {
    options.check_fits(image.len())?;

    let mut flasher = Flasher::connect(link, options)?;
    flasher.attach()?;
    flasher.write(image, &mut *progress)?;
    flasher.verify(image, progress)?;
    flasher.finish()
}
