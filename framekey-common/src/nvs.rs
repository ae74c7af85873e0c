// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! ESP-IDF NVS (format version 2) partition image encoder.
//!
//! Produces the same bytes as `nvs_partition_gen.py` for a partition holding
//! one namespace and one value. Page 0 is active with sequence number 0 and
//! every other page is left erased, which the NVS library needs as a spare.
//!
//! Page layout (4096 bytes):
//! - 0..32: header (state, sequence, version, CRC32 of bytes 4..28)
//! - 32..64: entry state bitmap, 2 bits per entry
//! - 64..4096: 126 entries of 32 bytes

#[cfg(feature = "std")]
use alloc::vec::Vec;

use crc::{Algorithm, Crc};
use thiserror::Error;
use zeroize::Zeroize;

use crate::key::{DeviceKey, DEVICE_KEY_HEX_LEN, DEVICE_KEY_LEN};

// --- Partition layout constants ---

pub const NVS_PAGE_SIZE: usize = 4096;
pub const NVS_ENTRY_SIZE: usize = 32;
pub const NVS_ENTRY_COUNT: usize = 126;
pub const NVS_MIN_PAGES: usize = 3;
pub const NVS_MAX_NAME_LEN: usize = 15;

pub const NVS_DEFAULT_OFFSET: u32 = 0x9000;
pub const NVS_DEFAULT_SIZE: u32 = 0x5000;

pub const DEFAULT_NAMESPACE: &str = "frame";
pub const DEFAULT_KEY: &str = "deviceKey";

const BITMAP_OFFSET: usize = 32;
const ENTRIES_OFFSET: usize = 64;
const KEY_FIELD_SIZE: usize = 16;

// --- Page header values ---

pub const PAGE_STATE_EMPTY: u32 = 0xFFFF_FFFF;
pub const PAGE_STATE_ACTIVE: u32 = 0xFFFF_FFFE;
pub const PAGE_VERSION_2: u8 = 0xFE;

/// Chunk index of entries that are not blob chunks.
pub const CHUNK_ANY: u8 = 0xFF;

/// Index of the first (and only) namespace written.
const NAMESPACE_INDEX: u8 = 1;

/// CRC-32 as computed by `esp_rom_crc32_le(0xFFFFFFFF, ..)`.
pub const CRC_32_ESP_NVS: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
    refin: true,
    refout: true,
    xorout: 0xffff_ffff,
    check: 0xd202_d277,
    residue: 0xdebb_20e3,
};

pub const NVS_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ESP_NVS);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemType {
    U8 = 0x01,
    Sz = 0x21,
    BlobData = 0x42,
    BlobIndex = 0x48,
}

/// How the device key is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    /// 32 raw bytes (`getBytes`)
    #[default]
    Blob,
    /// 64 lowercase hex characters, NUL terminated (`getString`)
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NvsError {
    #[error("NVS name must not be empty")]
    EmptyName,
    #[error("NVS name is {len} bytes long, maximum is {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("NVS name must be printable ASCII (space included)")]
    InvalidName,
    #[error("partition size {size:#x} must be a multiple of {page:#x} and at least {min:#x}", page = NVS_PAGE_SIZE, min = NVS_PAGE_SIZE * NVS_MIN_PAGES)]
    PartitionSize { size: usize },
    #[error("partition offset {offset:#x} is not aligned to {page:#x}", page = NVS_PAGE_SIZE)]
    Misaligned { offset: u32 },
    #[error("buffer is {found} bytes, expected {expected}")]
    BufferSize { expected: usize, found: usize },
}

/// Check that a name fits the 16-byte NUL padded key field.
pub fn check_name(name: &str) -> Result<(), NvsError> {
    if name.is_empty() {
        return Err(NvsError::EmptyName);
    }
    if name.len() > NVS_MAX_NAME_LEN {
        return Err(NvsError::NameTooLong {
            len: name.len(),
            max: NVS_MAX_NAME_LEN,
        });
    }
    if !name.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
        return Err(NvsError::InvalidName);
    }
    Ok(())
}

/// Check partition placement against the flash page grid.
pub fn check_partition(offset: u32, size: usize) -> Result<(), NvsError> {
    if offset as usize % NVS_PAGE_SIZE != 0 {
        return Err(NvsError::Misaligned { offset });
    }
    if size % NVS_PAGE_SIZE != 0 || size < NVS_PAGE_SIZE * NVS_MIN_PAGES {
        return Err(NvsError::PartitionSize { size });
    }
    Ok(())
}

/// CRC over an entry, skipping its own CRC field (bytes 4..8).
pub fn entry_crc(entry: &[u8]) -> u32 {
    let mut digest = NVS_CRC.digest();
    digest.update(&entry[0..4]);
    digest.update(&entry[8..NVS_ENTRY_SIZE]);
    digest.finalize()
}

/// CRC over the page header fields (bytes 4..28).
pub fn header_crc(page: &[u8]) -> u32 {
    NVS_CRC.checksum(&page[4..28])
}

/// Number of entries a variable length value of `len` bytes occupies,
/// counting its header entry.
pub fn varlen_span(len: usize) -> usize {
    1 + len.div_ceil(NVS_ENTRY_SIZE)
}

/// One value under one namespace, ready to be laid out on an NVS page.
#[derive(Debug, Clone, Copy)]
pub struct NvsEntry<'a> {
    namespace: &'a str,
    key: &'a str,
    value_type: ValueType,
    device_key: &'a DeviceKey,
}

impl<'a> NvsEntry<'a> {
    pub fn new(
        namespace: &'a str,
        key: &'a str,
        value_type: ValueType,
        device_key: &'a DeviceKey,
    ) -> Result<Self, NvsError> {
        check_name(namespace)?;
        check_name(key)?;
        Ok(Self {
            namespace,
            key,
            value_type,
            device_key,
        })
    }

    /// `frame` / `deviceKey` as a blob.
    pub fn device_key(device_key: &'a DeviceKey) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            key: DEFAULT_KEY,
            value_type: ValueType::Blob,
            device_key,
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace
    }

    pub fn key(&self) -> &str {
        self.key
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Length of the stored value in bytes.
    pub fn value_len(&self) -> usize {
        match self.value_type {
            ValueType::Blob => DEVICE_KEY_LEN,
            ValueType::String => DEVICE_KEY_HEX_LEN + 1,
        }
    }

    /// Total entries used on the page, namespace record included.
    pub fn entry_count(&self) -> usize {
        let value = varlen_span(self.value_len());
        match self.value_type {
            ValueType::Blob => 1 + value + 1,
            ValueType::String => 1 + value,
        }
    }

    /// Lay out the first (active) page.
    pub fn write_page(&self, page: &mut [u8]) -> Result<(), NvsError> {
        if page.len() != NVS_PAGE_SIZE {
            return Err(NvsError::BufferSize {
                expected: NVS_PAGE_SIZE,
                found: page.len(),
            });
        }

        page.fill(0xFF);
        write_page_header(page, PAGE_STATE_ACTIVE, 0);

        let mut writer = PageWriter { page, next: 0 };

        let mut ns_data = [0xFFu8; 8];
        ns_data[0] = NAMESPACE_INDEX;
        writer.push_entry(0, ItemType::U8, 1, CHUNK_ANY, self.namespace, ns_data);

        let mut value = [0u8; DEVICE_KEY_HEX_LEN + 1];
        let len = self.value_len();
        match self.value_type {
            ValueType::Blob => value[..len].copy_from_slice(self.device_key.as_bytes()),
            // trailing byte stays 0 as the terminator
            ValueType::String => value[..DEVICE_KEY_HEX_LEN].copy_from_slice(&self.device_key.to_hex()[..]),
        }
        let value_bytes = &value[..len];

        match self.value_type {
            ValueType::Blob => {
                writer.push_varlen(ItemType::BlobData, 0, self.key, value_bytes);

                let mut idx_data = [0xFFu8; 8];
                idx_data[0..4].copy_from_slice(&(len as u32).to_le_bytes());
                idx_data[4] = 1; // chunk count
                idx_data[5] = 0; // first chunk index
                writer.push_entry(
                    NAMESPACE_INDEX,
                    ItemType::BlobIndex,
                    1,
                    CHUNK_ANY,
                    self.key,
                    idx_data,
                );
            }
            ValueType::String => {
                writer.push_varlen(ItemType::Sz, CHUNK_ANY, self.key, value_bytes);
            }
        }

        value.zeroize();
        Ok(())
    }

    /// Lay out a whole partition: the active page followed by erased pages.
    pub fn write_image(&self, image: &mut [u8]) -> Result<(), NvsError> {
        check_partition(0, image.len())?;
        let (first, rest) = image.split_at_mut(NVS_PAGE_SIZE);
        self.write_page(first)?;
        rest.fill(0xFF);
        Ok(())
    }

    /// Encode a whole partition of `partition_size` bytes.
    #[cfg(feature = "std")]
    pub fn encode(&self, partition_size: usize) -> Result<Vec<u8>, NvsError> {
        check_partition(0, partition_size)?;
        let mut image = alloc::vec![0xFFu8; partition_size];
        self.write_image(&mut image)?;
        Ok(image)
    }
}

fn write_page_header(page: &mut [u8], state: u32, seq: u32) {
    page[0..4].copy_from_slice(&state.to_le_bytes());
    page[4..8].copy_from_slice(&seq.to_le_bytes());
    page[8] = PAGE_VERSION_2;
    page[9..28].fill(0xFF);
    let crc = header_crc(page);
    page[28..32].copy_from_slice(&crc.to_le_bytes());
}

/// Appends entries to a page and marks them written in the bitmap.
struct PageWriter<'p> {
    page: &'p mut [u8],
    next: usize,
}

impl PageWriter<'_> {
    fn slot(&mut self) -> &mut [u8] {
        let index = self.next;
        debug_assert!(index < NVS_ENTRY_COUNT);
        self.next += 1;

        // 0b11 empty -> 0b10 written
        self.page[BITMAP_OFFSET + index / 4] &= !(1 << ((index % 4) * 2));

        let start = ENTRIES_OFFSET + index * NVS_ENTRY_SIZE;
        &mut self.page[start..start + NVS_ENTRY_SIZE]
    }

    fn push_entry(
        &mut self,
        ns: u8,
        item_type: ItemType,
        span: u8,
        chunk: u8,
        key: &str,
        data: [u8; 8],
    ) {
        let entry = self.slot();
        entry[0] = ns;
        entry[1] = item_type as u8;
        entry[2] = span;
        entry[3] = chunk;
        entry[8..8 + KEY_FIELD_SIZE].fill(0);
        entry[8..8 + key.len()].copy_from_slice(key.as_bytes());
        entry[24..32].copy_from_slice(&data);
        let crc = entry_crc(entry);
        entry[4..8].copy_from_slice(&crc.to_le_bytes());
    }

    /// Header entry (size, data CRC) followed by 0xFF padded data entries.
    fn push_varlen(&mut self, item_type: ItemType, chunk: u8, key: &str, value: &[u8]) {
        let mut data = [0xFFu8; 8];
        data[0..2].copy_from_slice(&(value.len() as u16).to_le_bytes());
        data[4..8].copy_from_slice(&NVS_CRC.checksum(value).to_le_bytes());

        let span = varlen_span(value.len()) as u8;
        self.push_entry(NAMESPACE_INDEX, item_type, span, chunk, key, data);

        for piece in value.chunks(NVS_ENTRY_SIZE) {
            let entry = self.slot();
            entry[..piece.len()].copy_from_slice(piece);
        }
    }
}
