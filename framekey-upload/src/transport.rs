// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial transport layer for ROM loader communication.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use framekey_common::protocol::{Command, Response, DEFAULT_TIMEOUT};
use framekey_common::slip::{self, END};

use crate::error::{TransportError, WriteKeyError};

#[cfg(test)]
pub mod fake;

/// Stale responses skipped before giving up on a command.
const MAX_SKIPPED_RESPONSES: usize = 100;

/// The serial port features the ROM loader needs.
pub trait SerialLink: Read + Write {
    fn read_timeout(&self) -> Duration;
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    /// DTR drives GPIO0 on the usual auto-reset circuit.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;
    /// RTS drives EN on the usual auto-reset circuit.
    fn set_rts(&mut self, level: bool) -> io::Result<()>;
    fn discard_input(&mut self) -> io::Result<()>;
    fn port_name(&self) -> String;
}

impl SerialLink for Box<dyn SerialPort> {
    fn read_timeout(&self) -> Duration {
        self.timeout()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.write_data_terminal_ready(level).map_err(io::Error::from)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.write_request_to_send(level).map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn port_name(&self) -> String {
        self.name().unwrap_or_else(|| "?".to_string())
    }
}

/// Open the serial port at the loader baud rate.
pub fn open(port_name: &str, baud: u32) -> Result<Box<dyn SerialPort>, WriteKeyError> {
    tracing::debug!(port = port_name, baud, "opening serial port");
    serialport::new(port_name, baud)
        .timeout(DEFAULT_TIMEOUT)
        .open()
        .map_err(|source| WriteKeyError::Connection {
            port: port_name.to_string(),
            source,
        })
}

/// SLIP transport for talking to the ESP ROM loader.
pub struct Transport<L: SerialLink> {
    link: L,
    rx_buf: Vec<u8>,
}

impl<L: SerialLink> Transport<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            rx_buf: Vec::with_capacity(256),
        }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Send a command to the loader.
    pub fn send(&mut self, cmd: &Command) -> Result<(), TransportError> {
        let packet = cmd.encode()?;
        let framed = slip::encode(&packet);
        tracing::trace!(opcode = ?cmd.opcode(), len = packet.len(), "send");
        self.link.write_all(&framed)?;
        self.link.flush()?;
        Ok(())
    }

    /// Read one SLIP frame into `rx_buf`.
    ///
    /// Bytes before the first delimiter (boot banner, line noise) are dropped.
    fn read_frame(&mut self) -> Result<(), TransportError> {
        self.rx_buf.clear();
        let deadline = Instant::now() + self.link.read_timeout();
        let mut decoder = slip::Decoder::new();
        let mut in_frame = false;
        let mut byte = [0u8; 1];

        loop {
            if Instant::now() > deadline {
                return Err(TransportError::Timeout);
            }
            match self.link.read(&mut byte) {
                Ok(1) => {}
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout);
                }
                Err(e) => return Err(TransportError::Io(e)),
            }

            if !in_frame {
                in_frame = byte[0] == END;
                continue;
            }
            if byte[0] == END {
                // back-to-back delimiters are an empty frame
                if self.rx_buf.is_empty() {
                    continue;
                }
                decoder.finish()?;
                return Ok(());
            }
            if let Some(b) = decoder.feed(byte[0])? {
                self.rx_buf.push(b);
            }
        }
    }

    /// Wait for the response to `cmd`, skipping responses to earlier
    /// commands. Returns the response value and payload without status.
    pub fn receive(&mut self, cmd: &Command) -> Result<(u32, Vec<u8>), TransportError> {
        let opcode = cmd.opcode() as u8;
        for _ in 0..MAX_SKIPPED_RESPONSES {
            self.read_frame()?;
            let response = Response::parse(&self.rx_buf)?;
            if response.opcode != opcode {
                tracing::trace!(
                    expected = opcode,
                    got = response.opcode,
                    "skipping stale response"
                );
                continue;
            }
            response.status()?;
            return Ok((response.value, response.payload().to_vec()));
        }
        Err(TransportError::NoMatchingResponse(opcode))
    }

    /// Discard anything the device already sent.
    pub fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        let old_timeout = self.link.read_timeout();
        let _ = self.link.set_read_timeout(Duration::from_millis(10));
        while self.link.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.link.set_read_timeout(old_timeout);
    }

    /// Send a command and wait for its response, using the command's timeout.
    pub fn command(&mut self, cmd: &Command) -> Result<(u32, Vec<u8>), TransportError> {
        let old_timeout = self.link.read_timeout();
        self.link.set_read_timeout(cmd.timeout())?;

        let result = self.send(cmd).and_then(|_| self.receive(cmd));

        let _ = self.link.set_read_timeout(old_timeout);
        result
    }

    /// Pulse EN with GPIO0 held low so the chip boots into the ROM loader.
    pub fn reset_into_loader(&mut self, delay: Duration) -> io::Result<()> {
        self.link.set_dtr(false)?; // IO0 high
        self.link.set_rts(true)?; // EN low, chip in reset
        std::thread::sleep(delay);
        self.link.set_dtr(true)?; // IO0 low
        self.link.set_rts(false)?; // EN high, chip out of reset
        std::thread::sleep(delay / 2);
        self.link.set_dtr(false) // IO0 high, done
    }

    /// Pulse EN to run the application.
    pub fn hard_reset(&mut self, delay: Duration) -> io::Result<()> {
        self.link.set_rts(true)?;
        std::thread::sleep(delay);
        self.link.set_rts(false)
    }
}
