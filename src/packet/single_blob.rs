//! `LogoDataPacket` / `OtaDataPacket` (§3 "LogoData / OtaPayload"):
//! single-blob variants of the chunked transport with no row
//! tracking, sharing the same flat `PacketEngine` core.
//!
//! Grounded on `examples/original_source/mxSdk/Packet/OtaDataPacket.h`
//! (the original's `getProgress` returns an `int` rather than a float
//! for this variant; this crate keeps `f64` throughout for
//! consistency and lets callers round for display).

use super::{PacketEngine, PacketEngineAction, PacketEngineState};
use crate::errors::Result;

pub struct BlobPacket {
    engine: PacketEngine,
}

impl BlobPacket {
    pub fn new(progress_precision: u32) -> Self {
        BlobPacket {
            engine: PacketEngine::new(progress_precision),
        }
    }

    pub fn set(&mut self, payload: Vec<u8>, fh: u8) {
        self.engine.set(payload, fh);
    }

    pub fn clear(&mut self) {
        self.engine.clear();
    }

    pub fn has_data(&self) -> bool {
        self.engine.has_data()
    }

    pub fn state(&self) -> PacketEngineState {
        self.engine.state
    }

    pub fn progress(&self) -> f64 {
        self.engine.progress()
    }

    pub fn last_emitted(&self) -> Option<&[u8]> {
        self.engine.last_emitted()
    }

    pub fn total_data_len(&self) -> u64 {
        self.engine.total_data_len()
    }

    pub fn start_time_ms(&self) -> u64 {
        self.engine.start_time_ms()
    }

    pub fn now_time_ms(&self) -> u64 {
        self.engine.now_time_ms()
    }

    pub fn on_control_byte(&mut self, byte: u8) -> Result<PacketEngineAction> {
        self.engine.on_control_byte(byte)
    }

    pub fn cancel(&mut self) {
        self.engine.cancel();
    }
}

/// `fh` byte distinguishing payload class (§GLOSSARY "Fh").
pub const FH_PICTURE: u8 = 0x00;
pub const FH_LOGO: u8 = 0x01;
pub const FH_OTA: u8 = 0x02;

pub type LogoDataPacket = BlobPacket;
pub type OtaDataPacket = BlobPacket;
