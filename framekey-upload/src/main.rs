// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Writes a frame device key into an ESP32 NVS partition.
//!
//! Usage:
//!   framekey-upload <DEVICE_KEY_HEX> /dev/ttyUSB0
//!   framekey-upload <DEVICE_KEY_HEX> COM3 --value-type string
//!   framekey-upload <DEVICE_KEY_HEX> --output nvs.bin

mod cli;
mod commands;
mod error;
mod flasher;
mod transport;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = match cli::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // usage errors exit 1 like every other failure
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(args.log_level.into());

    match cli::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: tracing::Level) {
    let filter = EnvFilter::try_from_env("FRAMEKEY_LOG")
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
