//! Command/data scheduler (§4.3): serializes heterogeneous work units
//! (short control commands and, via `DataObj`, large payload
//! announcements) onto a single half-duplex link with per-unit
//! timeouts, delayed dispatch, and delegated completion.
//!
//! Grounded in shape on `examples/original_source/mxSdk/{Command.h,
//! CommandCallback.h, CommandContext.h, DataObj.h}`: `Command` carries
//! `index`/`data`/`tag`/`createTime`/`delayTime`/`isLossOnTimeout`;
//! `CommandContext` pairs one with a callback. The timer/backoff
//! *mechanics* (one background task driving a sleep-until-next-event
//! loop) are grounded on the teacher's `job_poller.rs` adaptive-backoff
//! loop and `circuit_breaker.rs`'s `Arc<Mutex<State>>` state machine.

pub mod scheduler;

use std::time::Instant;

/// §3 "Command": the short-control-command channel's work unit.
#[derive(Debug, Clone)]
pub struct Command {
    /// Random idempotency key used to match this command's eventual
    /// ACK; opaque to the scheduler otherwise (Open Question (a)).
    pub index: u32,
    pub data: Vec<u8>,
    pub opcode: u16,
    pub tag: i32,
    /// -1 = immediate (front of FIFO), >0 = fire after this many
    /// seconds from `create_time`.
    pub delay_time: f64,
    pub is_loss_on_timeout: bool,
}

impl Command {
    pub fn immediate(opcode: u16, data: Vec<u8>, tag: i32) -> Self {
        Command {
            index: rand_index(),
            data,
            opcode,
            tag,
            delay_time: -1.0,
            is_loss_on_timeout: false,
        }
    }

    pub fn delayed(opcode: u16, data: Vec<u8>, tag: i32, delay_seconds: f64) -> Self {
        Command {
            index: rand_index(),
            data,
            opcode,
            tag,
            delay_time: delay_seconds,
            is_loss_on_timeout: false,
        }
    }
}

fn rand_index() -> u32 {
    // A lightweight, dependency-free PRNG seed is enough here: the
    // index only needs to be unique among in-flight commands, not
    // cryptographically unpredictable.
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Terminal result of a `Command`, matching §4.3's three terminal
/// callbacks.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum CommandOutcome {
    Success,
    Error(String),
    Timeout { delay_efficacy: bool },
}

/// `(Command, Callback)` pair; created on enqueue, removed on terminal
/// callback invocation. `create_time` feeds the scheduler's
/// tie-break-by-createTime rule.
pub struct CommandContext {
    pub command: Command,
    pub create_time: Instant,
    pub(crate) reply: Option<tokio::sync::oneshot::Sender<CommandOutcome>>,
}

impl CommandContext {
    pub fn new(command: Command) -> (Self, tokio::sync::oneshot::Receiver<CommandOutcome>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            CommandContext {
                command,
                create_time: Instant::now(),
                reply: Some(tx),
            },
            rx,
        )
    }

    pub(crate) fn resolve(mut self, outcome: CommandOutcome) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(outcome);
        }
    }
}

/// §3 "DataObj": the large-payload channel's work unit. Same shape as
/// `Command` minus the timing/loss-policy fields — it rides a
/// dedicated packet engine (§4.4) rather than the response-timeout
/// dispatch loop.
#[derive(Debug, Clone)]
pub struct DataObj {
    pub index: u32,
    pub data: Vec<u8>,
    pub tag: i32,
}

impl DataObj {
    pub fn new(data: Vec<u8>, tag: i32) -> Self {
        DataObj {
            index: rand_index(),
            data,
            tag,
        }
    }
}
