// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory ESP32 ROM loader used by the transport and flasher tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::rc::Rc;
use std::time::Duration;

use framekey_common::protocol::{checksum, Opcode, DIRECTION_REQUEST, DIRECTION_RESPONSE};
use framekey_common::slip::{self, END};

use super::SerialLink;

pub const FAKE_FLASH_SIZE: usize = 0x2_0000;

/// Erased flash in the fake starts out holding this, so writes are visible.
pub const STALE_BYTE: u8 = 0xAB;

/// Sync replies per sync request; the real ROM sends several.
const SYNC_REPLIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    /// Never answers anything.
    Unresponsive,
    /// Answers the `FLASH_DATA` with this sequence number with a write error.
    NakBlock(u32),
    /// Flips the byte at this flash address after it is written.
    CorruptAt(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Dtr(bool),
    Rts(bool),
}

#[derive(Debug)]
struct FlashRegion {
    offset: usize,
    block_size: usize,
}

#[derive(Debug)]
struct State {
    behavior: Behavior,
    flash: Vec<u8>,
    decoder: slip::Decoder,
    in_frame: bool,
    frame: Vec<u8>,
    tx: VecDeque<u8>,
    synced: bool,
    ignore_syncs: usize,
    region: Option<FlashRegion>,
    requests: Vec<u8>,
    signals: Vec<Signal>,
    timeout: Duration,
}

/// Cloning shares the device, so a test can keep a handle after moving one
/// into the code under test.
#[derive(Debug, Clone)]
pub struct FakeRom {
    state: Rc<RefCell<State>>,
}

impl FakeRom {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::Normal)
    }

    pub fn unresponsive() -> Self {
        Self::with_behavior(Behavior::Unresponsive)
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                behavior,
                flash: vec![STALE_BYTE; FAKE_FLASH_SIZE],
                decoder: slip::Decoder::new(),
                in_frame: false,
                frame: Vec::new(),
                tx: VecDeque::new(),
                synced: false,
                ignore_syncs: 0,
                region: None,
                requests: Vec::new(),
                signals: Vec::new(),
                timeout: Duration::from_millis(100),
            })),
        }
    }

    /// Drop the first `count` sync requests, as a chip still booting would.
    pub fn ignore_first_syncs(self, count: usize) -> Self {
        self.state.borrow_mut().ignore_syncs = count;
        self
    }

    /// Queue raw bytes ahead of any response.
    pub fn push_noise(&self, bytes: &[u8]) {
        self.state.borrow_mut().tx.extend(bytes.iter().copied());
    }

    /// Opcodes of every request received, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.state.borrow().requests.clone()
    }

    pub fn received(&self, opcode: Opcode) -> usize {
        self.opcodes()
            .iter()
            .filter(|&&op| op == opcode as u8)
            .count()
    }

    pub fn flash(&self, range: Range<usize>) -> Vec<u8> {
        self.state.borrow().flash[range].to_vec()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.state.borrow().signals.clone()
    }
}

impl State {
    fn feed(&mut self, byte: u8) {
        if !self.in_frame {
            self.in_frame = byte == END;
            return;
        }
        if byte == END {
            if !self.frame.is_empty() {
                let frame = std::mem::take(&mut self.frame);
                self.handle(&frame);
            }
            return;
        }
        match self.decoder.feed(byte) {
            Ok(Some(b)) => self.frame.push(b),
            Ok(None) => {}
            Err(_) => {
                self.frame.clear();
                self.in_frame = false;
            }
        }
    }

    fn handle(&mut self, frame: &[u8]) {
        if frame.len() < 8 || frame[0] != DIRECTION_REQUEST {
            return;
        }
        let op = frame[1];
        let size = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        let check = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let data = &frame[8..(8 + size).min(frame.len())];
        self.requests.push(op);

        if self.behavior == Behavior::Unresponsive {
            return;
        }

        if op == Opcode::Sync as u8 {
            if self.ignore_syncs > 0 {
                self.ignore_syncs -= 1;
                return;
            }
            self.synced = true;
            for _ in 0..SYNC_REPLIES {
                self.reply(op, &[], Ok(()));
            }
            return;
        }
        if !self.synced {
            return;
        }

        let result = match op {
            op if op == Opcode::SpiAttach as u8 || op == Opcode::SpiSetParams as u8 => Ok(()),
            op if op == Opcode::FlashBegin as u8 => {
                let size = word(data, 0) as usize;
                let block_size = word(data, 2) as usize;
                let offset = word(data, 3) as usize;
                if offset + size > self.flash.len() {
                    Err(0x06)
                } else {
                    self.flash[offset..offset + size].fill(0xFF);
                    self.region = Some(FlashRegion { offset, block_size });
                    Ok(())
                }
            }
            op if op == Opcode::FlashData as u8 => self.flash_data(data, check),
            op if op == Opcode::FlashEnd as u8 => {
                self.region = None;
                Ok(())
            }
            op if op == Opcode::ReadFlashSlow as u8 => {
                let offset = word(data, 0) as usize;
                let len = word(data, 1) as usize;
                if offset + len > self.flash.len() {
                    Err(0x09)
                } else {
                    let bytes = self.flash[offset..offset + len].to_vec();
                    self.reply(op, &bytes, Ok(()));
                    return;
                }
            }
            _ => Err(0x05),
        };
        self.reply(op, &[], result);
    }

    fn flash_data(&mut self, data: &[u8], check: u32) -> Result<(), u8> {
        let Some(region) = &self.region else {
            return Err(0x06);
        };
        let len = word(data, 0) as usize;
        let seq = word(data, 1);
        let payload = &data[16..];
        if checksum(payload) != check {
            return Err(0x07);
        }
        if self.behavior == Behavior::NakBlock(seq) {
            return Err(0x08);
        }

        let start = region.offset + seq as usize * region.block_size;
        let end = (start + len).min(self.flash.len());
        self.flash[start..end].copy_from_slice(&payload[..end - start]);

        if let Behavior::CorruptAt(address) = self.behavior {
            let address = address as usize;
            if (start..end).contains(&address) {
                self.flash[address] ^= 0x01;
            }
        }
        Ok(())
    }

    fn reply(&mut self, op: u8, data: &[u8], result: Result<(), u8>) {
        let status = match result {
            Ok(()) => [0, 0, 0, 0],
            Err(code) => [1, code, 0, 0],
        };
        let mut packet = vec![DIRECTION_RESPONSE, op];
        packet.extend_from_slice(&((data.len() + status.len()) as u16).to_le_bytes());
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.extend_from_slice(data);
        packet.extend_from_slice(&status);
        self.tx.extend(slip::encode(&packet));
    }
}

fn word(data: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

impl Read for FakeRom {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.tx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "fake rom idle"));
        }
        let n = buf.len().min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeRom {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        for &byte in buf {
            state.feed(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for FakeRom {
    fn read_timeout(&self) -> Duration {
        self.state.borrow().timeout
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state.borrow_mut().timeout = timeout;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.state.borrow_mut().signals.push(Signal::Dtr(level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.state.borrow_mut().signals.push(Signal::Rts(level));
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.state.borrow_mut().tx.clear();
        Ok(())
    }

    fn port_name(&self) -> String {
        "fake".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_commands_before_sync() {
        let mut rom = FakeRom::new();
        let packet = [DIRECTION_REQUEST, Opcode::SpiAttach as u8, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        rom.write_all(&slip::encode(&packet)).unwrap();
        let mut buf = [0u8; 8];
        assert!(rom.read(&mut buf).is_err());
        assert_eq!(rom.opcodes(), vec![Opcode::SpiAttach as u8]);
    }

    #[test]
    fn test_records_signals() {
        let mut rom = FakeRom::new();
        rom.set_dtr(true).unwrap();
        rom.set_rts(false).unwrap();
        assert_eq!(rom.signals(), vec![Signal::Dtr(true), Signal::Rts(false)]);
    }
}
