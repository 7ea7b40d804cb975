//! Wire opcode table and command-frame codec (§6).
//!
//! Grounded on `examples/original_source/mxSdk/OpCode.h`. Frame format:
//! `0xAA 0x55 | len16_BE | opcode16_BE | params[...] | crc16`, where
//! `len` covers `opcode16 | params` (not the sync bytes or the CRC).

use crate::crc16::{append_crc16, verify_crc16};
use crate::errors::{EngineError, Result};

pub const SYNC: [u8; 2] = [0xAA, 0x55];

pub const OP_WRITE_PRINT_PARAMETERS: u16 = 0x0002;
pub const OP_READ_PRINT_PARAMETERS: u16 = 0x0003;
pub const OP_WRITE_CIRCULATION_AND_REPEAT_TIME: u16 = 0x0005;
pub const OP_READ_CIRCULATION_AND_REPEAT_TIME: u16 = 0x0006;
pub const OP_WRITE_DIRECTION_AND_HEAD_DIRECTION: u16 = 0x0007;
pub const OP_READ_DIRECTION_AND_HEAD_DIRECTION: u16 = 0x0008;
pub const OP_CLEAN_HEAD: u16 = 0x0009;
pub const OP_WRITE_HEAD_TEMPERATURE: u16 = 0x0012;
pub const OP_READ_HEAD_TEMPERATURE: u16 = 0x0013;
pub const OP_READ_HEAD_ID: u16 = 0x0014;
pub const OP_READ_BATTERY: u16 = 0x0018;
pub const OP_READ_BATTERY_CHARGING_STATE: u16 = 0x0019;
pub const OP_TRANSMIT_PICTURE: u16 = 0x0100;
pub const OP_READ_SOFTWARE_INFO: u16 = 0x0200;
pub const OP_RESTART: u16 = 0x0201;
pub const OP_CONNECT_STATE: u16 = 0x0202;
pub const OP_UPDATE_MCU: u16 = 0x0203;
pub const OP_TRANSMIT_LOGO: u16 = 0x0204;
pub const OP_PRINT_PICTURE: u16 = 0x0300;
pub const OP_WRITE_SILENT_STATE: u16 = 0x0303;
pub const OP_READ_SILENT_STATE: u16 = 0x0304;
pub const OP_WRITE_AUTO_POWER_OFF_STATE: u16 = 0x0305;
pub const OP_READ_AUTO_POWER_OFF_STATE: u16 = 0x0306;
pub const OP_PRINT_START: u16 = 0x1000;
pub const OP_PRINT_COMPLETE: u16 = 0x1001;

/// Not in the §6 subset table; grounded on `DistNetDevice.h`'s
/// provisioning fields (`mac`, `connTypes`, `firmwareConfigs`) — the
/// opcode that carries `(ssid, password)` over an active BLE link to
/// kick off distribution-network provisioning (§4.6).
pub const OP_WRITE_WIFI_CREDENTIALS: u16 = 0x0400;

/// Builds a framed command: `0xAA 0x55 | len16_BE | opcode16_BE | params | crc16`.
/// `params` may be a raw byte buffer built by the caller from any
/// convenience triple of pre-packed fields; the engine itself is
/// agnostic to their internal shape.
pub fn frame_command(opcode: u16, params: &[u8]) -> Vec<u8> {
    let body_len = 2 + params.len(); // opcode + params
    let mut out = Vec::with_capacity(2 + 2 + body_len + 2);
    out.extend_from_slice(&SYNC);
    out.extend_from_slice(&(body_len as u16).to_be_bytes());
    out.extend_from_slice(&opcode.to_be_bytes());
    out.extend_from_slice(params);
    append_crc16(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub opcode: u16,
    pub params: Vec<u8>,
}

/// Parses and CRC-validates a single command frame from `buf`. Returns
/// the parsed frame and the number of bytes consumed, allowing callers
/// to feed a rolling receive buffer that may contain more than one
/// frame, or a partial one.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(ParsedFrame, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    if buf[0] != SYNC[0] || buf[1] != SYNC[1] {
        return Err(EngineError::BadAck(format!(
            "expected sync bytes {:02x}{:02x}, found {:02x}{:02x}",
            SYNC[0], SYNC[1], buf[0], buf[1]
        )));
    }
    let body_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total_len = 4 + body_len + 2;
    if buf.len() < total_len {
        return Ok(None); // wait for more bytes
    }
    let frame = &buf[..total_len];
    let crc_region = &frame[2..total_len]; // len+opcode+params+crc
    if !verify_crc16(crc_region) {
        return Err(EngineError::BadAck("crc16 mismatch".to_string()));
    }
    let opcode = u16::from_be_bytes([frame[4], frame[5]]);
    let params = frame[6..4 + body_len].to_vec();
    Ok(Some((ParsedFrame { opcode, params }, total_len)))
}
