// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations: build the partition image, then save or flash it.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use framekey_common::nvs::{check_partition, NvsEntry, ValueType};
use framekey_common::validate;

use crate::error::{Stage, WriteKeyError};
use crate::flasher::{self, FlashOptions};
use crate::transport::SerialLink;

/// Where and how the key is stored in NVS.
#[derive(Debug, Clone, Copy)]
pub struct Partition<'a> {
    pub namespace: &'a str,
    pub key: &'a str,
    pub value_type: ValueType,
    pub size: u32,
}

/// Validate the key and build the full partition image.
pub fn prepare(
    key_hex: &str,
    partition: &Partition,
    options: &FlashOptions,
) -> Result<Vec<u8>, WriteKeyError> {
    let device_key = validate(key_hex)?;
    check_partition(options.offset, partition.size as usize)?;
    // before encode, which allocates the whole partition
    options.check_fits(partition.size as usize)?;

    let entry = NvsEntry::new(
        partition.namespace,
        partition.key,
        partition.value_type,
        &device_key,
    )?;
    let image = entry.encode(partition.size as usize)?;

    tracing::debug!(
        namespace = entry.namespace(),
        key = entry.key(),
        value_type = ?entry.value_type(),
        entries = entry.entry_count(),
        size = image.len(),
        "encoded partition image"
    );
    Ok(image)
}

/// Save the image for flashing with other tools.
pub fn export(image: &[u8], path: &Path, offset: u32) -> Result<()> {
    fs::write(path, image).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Image:  {} ({} bytes)", path.display(), image.len());
    println!(
        "Flash:  esptool.py write_flash 0x{:x} {}",
        offset,
        path.display()
    );
    Ok(())
}

/// Flash the image through the ROM loader and verify it.
pub fn write_key<L: SerialLink>(link: L, image: &[u8], options: FlashOptions) -> Result<()> {
    println!("Port:      {}", link.port_name());
    println!(
        "Partition: 0x{:x}..0x{:x} ({} bytes)",
        options.offset,
        options.offset as usize + image.len(),
        image.len()
    );
    println!();

    let pb = ProgressBar::new(image.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {msg:6} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut progress = |stage: Stage, done: usize, _total: usize| {
        let label = if stage == Stage::Verify { "verify" } else { "write" };
        if pb.message() != label {
            pb.set_message(label);
        }
        pb.set_position(done as u64);
    };

    match flasher::transmit(link, image, options, &mut progress) {
        Ok(()) => {
            pb.finish_with_message("done");
            println!();
            println!("Device key written and verified.");
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            if e.stage().is_some_and(|stage| stage.touches_flash()) {
                eprintln!(
                    "WARNING: the partition at 0x{:x} may be partially written",
                    options.offset
                );
            }
            Err(e.into())
        }
    }
}
