//! Chunked transport / packet engine (§4.4): an XMODEM-style
//! printer-driven pull protocol. The printer requests each packet by
//! sending a single control byte; the engine replies with one framed
//! chunk per request, retransmits on NAK, and reports monotone
//! progress until EOT or `MAX_ERRORS` consecutive non-progress
//! responses abort the transfer.
//!
//! Grounded on `examples/original_source/mxSdk/{Packet/BasePacket.h,
//! Packet/MultiRowDataPacket.h, Packet/OtaDataPacket.h, CRC16.h,
//! XModemCrc16.h}`.

pub mod multi_row;
pub mod single_blob;

use crate::crc16::crc16_xmodem;
use crate::errors::{EngineError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

fn system_time_to_ms(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Single-byte control codes sent by the printer (§4.4 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    RequestNext,
    SizeSelect(usize),
    Nak,
    Eot,
}

pub const BYTE_REQUEST_NEXT: u8 = 0x4E; // 'N'
pub const BYTE_SOH_128: u8 = 0x18;
pub const BYTE_STX_512: u8 = 0x19;
pub const BYTE_1024: u8 = 0x1A;
pub const BYTE_2048: u8 = 0x1B;
pub const BYTE_5120: u8 = 0x1C;
pub const BYTE_10240: u8 = 0x1D;
pub const BYTE_124: u8 = 0x1E;
pub const BYTE_NAK: u8 = 0x52; // 'R'
pub const BYTE_EOT: u8 = 0x44; // 'D'

pub fn classify_control_byte(byte: u8) -> Option<ControlByte> {
    match byte {
        BYTE_REQUEST_NEXT => Some(ControlByte::RequestNext),
        BYTE_SOH_128 => Some(ControlByte::SizeSelect(128)),
        BYTE_STX_512 => Some(ControlByte::SizeSelect(512)),
        BYTE_1024 => Some(ControlByte::SizeSelect(1024)),
        BYTE_2048 => Some(ControlByte::SizeSelect(2048)),
        BYTE_5120 => Some(ControlByte::SizeSelect(5120)),
        BYTE_10240 => Some(ControlByte::SizeSelect(10240)),
        BYTE_124 => Some(ControlByte::SizeSelect(124)),
        BYTE_NAK => Some(ControlByte::Nak),
        BYTE_EOT => Some(ControlByte::Eot),
        _ => None,
    }
}

pub const MAX_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketEngineState {
    Idle,
    Armed,
    Streaming,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketEngineAction {
    Emitted,
    Retransmitted,
    Done,
    Aborted,
    NoOp,
}

/// Frames one emission: `fh(1) | sizeCode(1) | seq(1) | ~seq(1) |
/// payload(usefulLen) | crc16(2)`, padding the final short packet with
/// a fixed filler byte.
pub fn build_packet(fh: u8, size_code: u8, seq: u8, payload: &[u8], useful_len: usize) -> Vec<u8> {
    const FILLER: u8 = 0x1A;
    let mut body = Vec::with_capacity(4 + useful_len);
    body.push(fh);
    body.push(size_code);
    body.push(seq);
    body.push(!seq);
    body.extend_from_slice(payload);
    while body.len() < 4 + useful_len {
        body.push(FILLER);
    }
    let crc = crc16_xmodem(&body);
    body.extend_from_slice(&crc.to_be_bytes());
    body
}

fn size_code_for(useful_len: usize) -> u8 {
    match useful_len {
        128 => BYTE_SOH_128,
        512 => BYTE_STX_512,
        1024 => BYTE_1024,
        2048 => BYTE_2048,
        5120 => BYTE_5120,
        10240 => BYTE_10240,
        124 => BYTE_124,
        _ => BYTE_STX_512,
    }
}

/// Shared engine core: a flat byte payload framed into successive
/// packets. `MultiRowDataPacket` wraps this with row-boundary
/// bookkeeping (§4.4); `LogoDataPacket`/`OtaDataPacket` use it
/// directly as single-blob variants.
pub struct PacketEngine {
    pub state: PacketEngineState,
    fh: u8,
    payload: Vec<u8>,
    useful_len: usize,
    cursor: usize,
    seq: u8,
    last_emitted: Option<Vec<u8>>,
    consecutive_errors: u32,
    start_time: Option<SystemTime>,
    now_time: Option<SystemTime>,
    progress_precision: u32,
    /// Set by a wrapper (e.g. `MultiRowDataPacket`) immediately before a
    /// single emission to shorten that one packet so it stops at a row
    /// boundary instead of reading `useful_len` bytes straight through
    /// it. Cleared automatically after the emission it applied to.
    next_emission_clamp: Option<usize>,
}

impl PacketEngine {
    pub fn new(progress_precision: u32) -> Self {
        PacketEngine {
            state: PacketEngineState::Idle,
            fh: 0,
            payload: Vec::new(),
            useful_len: 512,
            cursor: 0,
            seq: 0,
            last_emitted: None,
            consecutive_errors: 0,
            start_time: None,
            now_time: None,
            progress_precision,
            next_emission_clamp: None,
        }
    }

    pub fn clear(&mut self) {
        self.state = PacketEngineState::Idle;
        self.payload.clear();
        self.cursor = 0;
        self.seq = 0;
        self.last_emitted = None;
        self.consecutive_errors = 0;
        self.start_time = None;
        self.now_time = None;
        self.next_emission_clamp = None;
    }

    /// Shortens the very next emitted packet to at most `max_len` bytes
    /// past the current cursor, regardless of `useful_len`. Used by
    /// `MultiRowDataPacket` to keep a packet from spanning a row
    /// boundary; cleared after one use.
    pub fn set_next_emission_clamp(&mut self, max_len: Option<usize>) {
        self.next_emission_clamp = max_len;
    }

    pub fn set(&mut self, payload: Vec<u8>, fh: u8) {
        self.clear();
        self.payload = payload;
        self.fh = fh;
        self.state = PacketEngineState::Armed;
        self.start_time = Some(SystemTime::now());
    }

    /// Milliseconds since the Unix epoch when `set` armed this
    /// transfer, or 0 if no transfer has started (§4.4
    /// `onDataProgress(size, fraction, precision, startTime, nowTime)`).
    pub fn start_time_ms(&self) -> u64 {
        system_time_to_ms(self.start_time)
    }

    /// Milliseconds since the Unix epoch at the most recent emission.
    pub fn now_time_ms(&self) -> u64 {
        system_time_to_ms(self.now_time)
    }

    pub fn has_data(&self) -> bool {
        !self.payload.is_empty()
    }

    /// `totalDataLen` (§3 "Packet engine state"): the flat payload's
    /// total byte length, reported verbatim as `onDataProgress`'s
    /// `size` parameter.
    pub fn total_data_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Payload bytes emitted so far. Unlike `progress()`, this is exact
    /// rather than rounded to `progress_precision` decimal places, so
    /// callers that need to detect an exact byte offset (e.g. a row
    /// boundary) must use this instead of reconstructing an offset from
    /// the rounded fraction.
    pub fn bytes_emitted(&self) -> usize {
        self.cursor
    }

    /// Packets remaining at the current `useful_len` if every future
    /// emission ran uncurtailed; informational only, since a row
    /// boundary can shorten an individual emission below `useful_len`.
    pub fn total_packet_count(&self) -> u32 {
        if self.payload.is_empty() {
            return 0;
        }
        ((self.payload.len() + self.useful_len - 1) / self.useful_len) as u32
    }

    /// Fraction of payload bytes emitted so far, rounded to
    /// `progress_precision` decimal places for `onDataProgress`
    /// display. Byte-based rather than packet-count-based so a clamped
    /// (row-boundary-shortened) packet still advances progress by
    /// exactly the bytes it carried.
    pub fn progress(&self) -> f64 {
        if self.payload.is_empty() {
            return 0.0;
        }
        let raw = self.cursor as f64 / self.payload.len() as f64;
        let scale = 10f64.powi(self.progress_precision as i32);
        (raw * scale).round() / scale
    }

    fn current_slice(&self) -> &[u8] {
        let start = self.cursor.min(self.payload.len());
        let mut end = (start + self.useful_len).min(self.payload.len());
        if let Some(clamp) = self.next_emission_clamp {
            end = end.min(start + clamp);
        }
        &self.payload[start..end]
    }

    /// Advances the state machine in response to one printer control
    /// byte. Returns the action taken; callers read the freshly built
    /// packet (if any) via `last_emitted()`.
    pub fn on_control_byte(&mut self, byte: u8) -> Result<PacketEngineAction> {
        let Some(control) = classify_control_byte(byte) else {
            return self.register_non_progress();
        };

        match (self.state, control) {
            (PacketEngineState::Armed, ControlByte::SizeSelect(size)) => {
                self.useful_len = size;
                self.state = PacketEngineState::Streaming;
                self.emit_next()
            }
            (PacketEngineState::Streaming, ControlByte::SizeSelect(size)) => {
                self.useful_len = size;
                self.emit_next()
            }
            (PacketEngineState::Streaming, ControlByte::RequestNext) => self.emit_next(),
            (PacketEngineState::Streaming, ControlByte::Nak) => self.retransmit(),
            (PacketEngineState::Streaming, ControlByte::Eot) => {
                self.state = PacketEngineState::Done;
                Ok(PacketEngineAction::Done)
            }
            _ => self.register_non_progress(),
        }
    }

    fn register_non_progress(&mut self) -> Result<PacketEngineAction> {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= MAX_ERRORS {
            self.state = PacketEngineState::Error;
            return Err(EngineError::MaxErrorsExceeded(MAX_ERRORS));
        }
        Ok(PacketEngineAction::NoOp)
    }

    fn emit_next(&mut self) -> Result<PacketEngineAction> {
        if self.cursor >= self.payload.len() {
            // No more data; stay in Streaming rather than jumping to
            // Done ourselves, so the EOT the printer sends next still
            // drives the real state transition.
            return Ok(PacketEngineAction::Done);
        }
        let slice = self.current_slice().to_vec();
        let size_code = size_code_for(self.useful_len);
        let packet = build_packet(self.fh, size_code, self.seq, &slice, self.useful_len);
        self.last_emitted = Some(packet);
        self.cursor += slice.len();
        self.next_emission_clamp = None;
        self.seq = self.seq.wrapping_add(1);
        self.consecutive_errors = 0;
        self.now_time = Some(SystemTime::now());
        Ok(PacketEngineAction::Emitted)
    }

    fn retransmit(&mut self) -> Result<PacketEngineAction> {
        if self.last_emitted.is_none() {
            return self.register_non_progress();
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors >= MAX_ERRORS {
            self.state = PacketEngineState::Error;
            return Err(EngineError::MaxErrorsExceeded(MAX_ERRORS));
        }
        Ok(PacketEngineAction::Retransmitted)
    }

    pub fn last_emitted(&self) -> Option<&[u8]> {
        self.last_emitted.as_deref()
    }

    pub fn cancel(&mut self) {
        self.state = PacketEngineState::Idle;
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_expected_packet_count_for_aligned_payload() {
        let mut engine = PacketEngine::new(2);
        engine.set(vec![0xAB; 1800], 0);
        engine.on_control_byte(BYTE_STX_512).unwrap(); // size select + first emit
        let mut count = 1;
        loop {
            match engine.on_control_byte(BYTE_REQUEST_NEXT).unwrap() {
                PacketEngineAction::Emitted => count += 1,
                PacketEngineAction::Done => break,
                other => panic!("unexpected action {other:?}"),
            }
        }
        assert_eq!(count, 4); // ceil(1800/512) = 4
        assert!(engine.on_control_byte(BYTE_EOT).unwrap() == PacketEngineAction::Done);
        assert_eq!(engine.progress(), 1.0);
    }

    #[test]
    fn nak_retransmits_byte_identical_packet() {
        let mut engine = PacketEngine::new(2);
        engine.set(vec![0x11; 1800], 7);
        engine.on_control_byte(BYTE_STX_512).unwrap();
        let first = engine.last_emitted().unwrap().to_vec();
        engine.on_control_byte(BYTE_NAK).unwrap();
        let retransmitted = engine.last_emitted().unwrap().to_vec();
        assert_eq!(first, retransmitted);
    }

    #[test]
    fn progress_is_monotone_non_decreasing() {
        let mut engine = PacketEngine::new(2);
        engine.set(vec![0x00; 5000], 0);
        engine.on_control_byte(BYTE_STX_512).unwrap();
        let mut last = engine.progress();
        loop {
            match engine.on_control_byte(BYTE_REQUEST_NEXT).unwrap() {
                PacketEngineAction::Emitted => {
                    let now = engine.progress();
                    assert!(now >= last);
                    last = now;
                }
                PacketEngineAction::Done => break,
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn max_errors_aborts_transfer() {
        let mut engine = PacketEngine::new(2);
        engine.set(vec![0x00; 10], 0);
        for _ in 0..MAX_ERRORS - 1 {
            assert!(engine.on_control_byte(0xFF).is_ok());
        }
        let result = engine.on_control_byte(0xFF);
        assert!(result.is_err());
        assert_eq!(engine.state, PacketEngineState::Error);
    }

    #[test]
    fn every_emitted_packet_has_valid_crc() {
        let mut engine = PacketEngine::new(2);
        engine.set(vec![0x42; 2000], 3);
        engine.on_control_byte(BYTE_1024).unwrap();
        loop {
            let packet = engine.last_emitted().unwrap();
            assert!(crate::crc16::verify_crc16(packet));
            match engine.on_control_byte(BYTE_REQUEST_NEXT).unwrap() {
                PacketEngineAction::Emitted => continue,
                PacketEngineAction::Done => break,
                _ => unreachable!(),
            }
        }
    }
}
