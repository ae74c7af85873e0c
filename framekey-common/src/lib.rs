// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types for writing a frame device key into ESP32 NVS.
//!
//! This crate supports both `no_std` and `std` (host) environments:
//! - Default: `no_std`, all encoders work on caller-provided buffers
//! - `std` feature: adds `Vec` based helpers and `std::error::Error` impls

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod key;
pub mod nvs;
pub mod protocol;
pub mod slip;

// Re-export commonly used types
pub use key::{validate, DeviceKey, KeyError, DEVICE_KEY_HEX_LEN, DEVICE_KEY_LEN};
pub use nvs::{NvsEntry, NvsError, ValueType, DEFAULT_KEY, DEFAULT_NAMESPACE};
pub use nvs::{NVS_DEFAULT_OFFSET, NVS_DEFAULT_SIZE, NVS_PAGE_SIZE};
pub use protocol::{Command, ProtocolError, Response, RomError, FLASH_WRITE_SIZE};
