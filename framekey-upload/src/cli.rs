// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use framekey_common::nvs::{ValueType, DEFAULT_KEY, DEFAULT_NAMESPACE};
use framekey_common::protocol::DEFAULT_FLASH_SIZE;
use framekey_common::{NVS_DEFAULT_OFFSET, NVS_DEFAULT_SIZE};

use crate::commands::{self, Partition};
use crate::flasher::{AfterReset, BeforeReset, FlashOptions};
use crate::transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "framekey-upload", version)]
#[command(about = "Write a frame device key into an ESP32 NVS partition over the ROM serial loader")]
pub struct Cli {
    /// Device key, 64 hex characters
    #[arg(value_name = "DEVICE_KEY_HEX")]
    pub device_key: String,

    /// Serial port (e.g., /dev/ttyUSB0 or COM3)
    #[arg(value_name = "PORT", env = "FRAMEKEY_PORT", required_unless_present = "output")]
    pub port: Option<String>,

    /// ROM loader baud rate
    #[arg(short, long, env = "FRAMEKEY_BAUD", default_value_t = framekey_common::protocol::ROM_BAUD)]
    pub baud: u32,

    /// NVS partition offset
    #[arg(long, value_parser = parse_int, default_value_t = NVS_DEFAULT_OFFSET)]
    pub offset: u32,

    /// NVS partition size
    #[arg(long, value_parser = parse_int, default_value_t = NVS_DEFAULT_SIZE)]
    pub size: u32,

    /// Total flash size of the chip
    #[arg(long, value_parser = parse_int, default_value_t = DEFAULT_FLASH_SIZE)]
    pub flash_size: u32,

    /// NVS namespace
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// NVS key name
    #[arg(long, default_value = DEFAULT_KEY)]
    pub key: String,

    /// How the key is stored. The stock frame firmware reads it with
    /// getString("deviceKey"), so it needs `string`
    #[arg(long, value_enum, default_value_t = ValueTypeArg::Blob)]
    pub value_type: ValueTypeArg,

    /// Write the partition image to FILE instead of flashing it
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Reset before talking to the loader
    #[arg(long, value_enum, default_value_t = BeforeReset::DefaultReset)]
    pub before: BeforeReset,

    /// Reset after writing
    #[arg(long, value_enum, default_value_t = AfterReset::HardReset)]
    pub after: AfterReset,

    /// Log verbosity (FRAMEKEY_LOG takes precedence)
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValueTypeArg {
    /// 32 raw bytes
    Blob,
    /// 64 hex characters, as read by the stock frame firmware
    String,
}

impl From<ValueTypeArg> for ValueType {
    fn from(arg: ValueTypeArg) -> Self {
        match arg {
            ValueTypeArg::Blob => ValueType::Blob,
            ValueTypeArg::String => ValueType::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Parse `0x` prefixed hex or plain decimal.
fn parse_int(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let options = FlashOptions {
        offset: cli.offset,
        flash_size: cli.flash_size,
        before: cli.before,
        after: cli.after,
        ..FlashOptions::default()
    };
    let partition = Partition {
        namespace: &cli.namespace,
        key: &cli.key,
        value_type: cli.value_type.into(),
        size: cli.size,
    };

    // nothing touches the port until the key and layout are known good
    let image = commands::prepare(&cli.device_key, &partition, &options)?;

    if let Some(path) = &cli.output {
        return commands::export(&image, path, options.offset);
    }

    let port = cli.port.as_deref().context("no serial port given")?;
    let link = transport::open(port, cli.baud)?;
    commands::write_key(link, &image, options)
}
