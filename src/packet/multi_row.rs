//! `MultiRowDataPacket` (§4.4): wraps the flat packet engine with
//! per-row cursor bookkeeping so callers can observe `(currentRow,
//! indexInCurrentRowPacket)` and choose between streaming all rows
//! back-to-back or pausing after each row for a "print complete"
//! event.
//!
//! Grounded on `examples/original_source/mxSdk/Packet/MultiRowDataPacket.h`.

use super::{PacketEngine, PacketEngineAction, PacketEngineState};
use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// Open Question (c): `DataSendCompleteOnceWaitNext` preserves the
/// cursor and advances to the next row on a "print complete" event
/// rather than resetting it (decided in SPEC_FULL.md §14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiRowSendMode {
    DataSendOnceContinuous,
    DataSendCompleteOnceWaitNext,
}

pub struct MultiRowDataPacket {
    engine: PacketEngine,
    row_boundaries: Vec<usize>, // cumulative end offset of each row within the flat payload
    mode: MultiRowSendMode,
    waiting_for_print_complete: bool,
}

impl MultiRowDataPacket {
    pub fn new(progress_precision: u32, mode: MultiRowSendMode) -> Self {
        MultiRowDataPacket {
            engine: PacketEngine::new(progress_precision),
            row_boundaries: Vec::new(),
            mode,
            waiting_for_print_complete: false,
        }
    }

    pub fn set(&mut self, rows: &[Vec<u8>], fh: u8) {
        let mut flat = Vec::new();
        let mut boundaries = Vec::with_capacity(rows.len());
        for row in rows {
            flat.extend_from_slice(row);
            boundaries.push(flat.len());
        }
        self.row_boundaries = boundaries;
        self.waiting_for_print_complete = false;
        self.engine.set(flat, fh);
    }

    pub fn clear(&mut self) {
        self.engine.clear();
        self.row_boundaries.clear();
        self.waiting_for_print_complete = false;
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

    /// Row the cursor currently sits in. At a row boundary exactly
    /// (`emitted == end`) this reports the row that was just
    /// completed, not the next one, so a caller that observes a pause
    /// sees the row it should confirm "print complete" for.
    pub fn get_current_row(&self) -> usize {
        let emitted = self.engine.bytes_emitted();
        self.row_boundaries
            .iter()
            .position(|&end| emitted <= end)
            .unwrap_or_else(|| self.row_boundaries.len().saturating_sub(1))
    }

    /// First row boundary strictly past the cursor, i.e. the stopping
    /// point the *next* emission must not cross.
    fn next_row_boundary(&self) -> Option<usize> {
        let emitted = self.engine.bytes_emitted();
        self.row_boundaries.iter().find(|&&end| end > emitted).copied()
    }

    pub fn has_next_row(&self) -> bool {
        self.get_current_row() + 1 < self.row_boundaries.len()
    }

    /// `indexInCurrentRowPacket` (§4.4): byte offset of the next unread
    /// byte within the current row, so callers can observe the full
    /// `(currentRow, indexInCurrentRowPacket)` cursor pair.
    pub fn index_in_current_row(&self) -> usize {
        let emitted = self.engine.bytes_emitted();
        let row = self.get_current_row();
        let row_start = if row == 0 { 0 } else { self.row_boundaries[row - 1] };
        emitted.saturating_sub(row_start)
    }

    /// Called when a "print complete" event is observed while in
    /// `DataSendCompleteOnceWaitNext` mode: preserves the cursor and
    /// allows streaming of the next row to resume.
    pub fn cursor_move_to_next(&mut self) {
        self.waiting_for_print_complete = false;
    }

    pub fn on_control_byte(&mut self, byte: u8) -> Result<PacketEngineAction> {
        if self.waiting_for_print_complete {
            return Ok(PacketEngineAction::NoOp);
        }
        // Keep a packet from spanning a row boundary so the cursor can
        // land on it exactly even when row lengths aren't multiples of
        // the packet size.
        let emitted = self.engine.bytes_emitted();
        let clamp = self.next_row_boundary().map(|end| end.saturating_sub(emitted));
        self.engine.set_next_emission_clamp(clamp);
        let action = self.engine.on_control_byte(byte)?;
        if action == PacketEngineAction::Emitted
            && self.mode == MultiRowSendMode::DataSendCompleteOnceWaitNext
            && self.just_crossed_row_boundary()
        {
            self.waiting_for_print_complete = true;
        }
        Ok(action)
    }

    fn just_crossed_row_boundary(&self) -> bool {
        let emitted = self.engine.bytes_emitted();
        self.row_boundaries.iter().any(|&b| b == emitted)
    }

    pub fn cancel(&mut self) {
        self.engine.cancel();
        self.waiting_for_print_complete = false;
    }
}
