// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for ROM loader packets and constants.

use framekey_common::protocol::{
    checksum, Command, Opcode, ProtocolError, Response, RomError, DEFAULT_TIMEOUT,
    FLASH_WRITE_SIZE, MAX_REQUEST_LEN, READ_FLASH_BLOCK_SIZE, ROM_BAUD, SYNC_TIMEOUT,
};
use framekey_common::slip::{self, END};

fn response_frame(opcode: u8, value: u32, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x01, opcode];
    frame.extend_from_slice(&(data.len() as u16).to_le_bytes());
    frame.extend_from_slice(&value.to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

// --- Constants ---

#[test]
fn test_rom_baud() {
    assert_eq!(ROM_BAUD, 115_200);
}

#[test]
fn test_block_sizes() {
    assert_eq!(FLASH_WRITE_SIZE, 1024);
    assert_eq!(READ_FLASH_BLOCK_SIZE, 64);
    assert_eq!(MAX_REQUEST_LEN, 8 + 16 + 1024);
}

#[test]
fn test_opcodes() {
    assert_eq!(Opcode::FlashBegin as u8, 0x02);
    assert_eq!(Opcode::FlashData as u8, 0x03);
    assert_eq!(Opcode::FlashEnd as u8, 0x04);
    assert_eq!(Opcode::Sync as u8, 0x08);
    assert_eq!(Opcode::SpiSetParams as u8, 0x0B);
    assert_eq!(Opcode::SpiAttach as u8, 0x0D);
    assert_eq!(Opcode::ReadFlashSlow as u8, 0x0E);
}

// --- Request encoding ---

#[test]
fn test_sync_request() {
    let packet = Command::Sync.encode().unwrap();
    assert_eq!(&packet[..8], &[0x00, 0x08, 36, 0, 0, 0, 0, 0]);
    assert_eq!(&packet[8..12], &[0x07, 0x07, 0x12, 0x20]);
    assert_eq!(packet.len(), 8 + 36);
}

#[test]
fn test_spi_attach_request() {
    let packet = Command::SpiAttach.encode().unwrap();
    assert_eq!(&packet[..4], &[0x00, 0x0D, 8, 0]);
    assert!(packet[8..].iter().all(|&b| b == 0));
}

#[test]
fn test_spi_set_params_request() {
    let packet = Command::SpiSetParams {
        total_size: 0x40_0000,
    }
    .encode()
    .unwrap();
    assert_eq!(&packet[2..4], &[24, 0]);
    assert_eq!(&packet[8..12], &[0, 0, 0, 0]);
    assert_eq!(&packet[12..16], &0x40_0000u32.to_le_bytes());
    assert_eq!(&packet[28..32], &0xFFFFu32.to_le_bytes());
}

#[test]
fn test_flash_begin_request() {
    let packet = Command::FlashBegin {
        size: 0x5000,
        blocks: 20,
        block_size: 0x400,
        offset: 0x9000,
    }
    .encode()
    .unwrap();
    assert_eq!(&packet[..4], &[0x00, 0x02, 16, 0]);
    assert_eq!(&packet[8..12], &0x5000u32.to_le_bytes());
    assert_eq!(&packet[12..16], &20u32.to_le_bytes());
    assert_eq!(&packet[16..20], &0x400u32.to_le_bytes());
    assert_eq!(&packet[20..24], &0x9000u32.to_le_bytes());
}

#[test]
fn test_flash_data_request_is_padded_and_checksummed() {
    let data = [0x12u8, 0x34, 0x56];
    let packet = Command::FlashData { seq: 7, data: &data }.encode().unwrap();

    assert_eq!(packet.len(), MAX_REQUEST_LEN);
    assert_eq!(&packet[2..4], &((16 + 1024) as u16).to_le_bytes());
    assert_eq!(&packet[8..12], &1024u32.to_le_bytes());
    assert_eq!(&packet[12..16], &7u32.to_le_bytes());
    assert_eq!(&packet[24..27], &data);
    assert!(packet[27..].iter().all(|&b| b == 0xFF));

    let expected = checksum(&packet[24..]);
    assert_eq!(&packet[4..8], &expected.to_le_bytes());
}

#[test]
fn test_flash_data_rejects_oversized_block() {
    let data = [0u8; FLASH_WRITE_SIZE + 1];
    assert_eq!(
        Command::FlashData { seq: 0, data: &data }.encode(),
        Err(ProtocolError::BlockTooLarge(FLASH_WRITE_SIZE + 1))
    );
}

#[test]
fn test_flash_end_stay_in_loader() {
    let packet = Command::FlashEnd { reboot: false }.encode().unwrap();
    assert_eq!(&packet[8..12], &1u32.to_le_bytes());
    let packet = Command::FlashEnd { reboot: true }.encode().unwrap();
    assert_eq!(&packet[8..12], &0u32.to_le_bytes());
}

#[test]
fn test_read_flash_slow_request() {
    let packet = Command::ReadFlashSlow {
        offset: 0x9040,
        len: 64,
    }
    .encode()
    .unwrap();
    assert_eq!(&packet[..4], &[0x00, 0x0E, 8, 0]);
    assert_eq!(&packet[8..12], &0x9040u32.to_le_bytes());
    assert_eq!(&packet[12..16], &64u32.to_le_bytes());
}

#[test]
fn test_slip_framed_request_has_no_inner_delimiters() {
    // 0xC0 in the payload must be escaped
    let data = [END; 4];
    let packet = Command::FlashData { seq: 0, data: &data }.encode().unwrap();
    let framed: heapless::Vec<u8, { 2 * MAX_REQUEST_LEN + 2 }> =
        slip::encode_heapless(&packet).unwrap();
    assert_eq!(framed[0], END);
    assert_eq!(framed[framed.len() - 1], END);
    assert!(framed[1..framed.len() - 1].iter().all(|&b| b != END));

    let decoded: heapless::Vec<u8, MAX_REQUEST_LEN> = slip::decode_heapless(&framed).unwrap();
    assert_eq!(&decoded[..], &packet[..]);
}

// --- Timeouts ---

#[test]
fn test_timeouts() {
    assert_eq!(Command::Sync.timeout(), SYNC_TIMEOUT);
    assert_eq!(Command::SpiAttach.timeout(), DEFAULT_TIMEOUT);
    assert_eq!(
        Command::FlashData { seq: 0, data: &[] }.timeout(),
        DEFAULT_TIMEOUT
    );
}

// --- Response parsing ---

#[test]
fn test_parse_ok_response() {
    let frame = response_frame(0x08, 0x1234_5678, &[0, 0, 0, 0]);
    let response = Response::parse(&frame).unwrap();
    assert_eq!(response.opcode, 0x08);
    assert_eq!(response.value, 0x1234_5678);
    assert!(response.status().is_ok());
    assert!(response.payload().is_empty());
}

#[test]
fn test_parse_error_status() {
    let frame = response_frame(0x03, 0, &[1, 0x07, 0, 0]);
    let response = Response::parse(&frame).unwrap();
    assert_eq!(
        response.status(),
        Err(ProtocolError::Rom(RomError::InvalidCrc))
    );
}

#[test]
fn test_parse_payload_before_status() {
    let mut data = vec![0xAB; 64];
    data.extend_from_slice(&[0, 0, 0, 0]);
    let frame = response_frame(0x0E, 0, &data);
    let response = Response::parse(&frame).unwrap();
    assert_eq!(response.payload(), &[0xAB; 64][..]);
}

#[test]
fn test_parse_rejects_request_direction() {
    let mut frame = response_frame(0x08, 0, &[0, 0, 0, 0]);
    frame[0] = 0x00;
    assert_eq!(Response::parse(&frame), Err(ProtocolError::Direction(0x00)));
}

#[test]
fn test_parse_rejects_short_frame() {
    assert_eq!(
        Response::parse(&[0x01, 0x08, 0]),
        Err(ProtocolError::TooShort(3))
    );
}

#[test]
fn test_parse_rejects_truncated_data() {
    let mut frame = response_frame(0x08, 0, &[0, 0, 0, 0]);
    frame.truncate(10);
    assert_eq!(
        Response::parse(&frame),
        Err(ProtocolError::Truncated {
            expected: 4,
            found: 2
        })
    );
}

#[test]
fn test_missing_status() {
    let frame = response_frame(0x08, 0, &[0, 0]);
    let response = Response::parse(&frame).unwrap();
    assert_eq!(response.status(), Err(ProtocolError::MissingStatus));
}
