//! Dispatch loop implementing §4.3's five numbered steps: one in-flight
//! command at a time, FIFO + delayed-ring admission, single automatic
//! re-arm on timeout, and cancel-all on disconnect.

use super::{Command, CommandContext, CommandOutcome};
use crate::errors::{EngineError, Result};
use crate::events::{Event, EventBus};
use crate::link::LinkStrategy;
use crate::opcode::frame_command;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

enum Message {
    Enqueue(CommandContext),
    Ack(u16),
    CancelAll,
}

struct InFlight {
    ctx: CommandContext,
    opcode: u16,
    armed_at: Instant,
    retried: bool,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<Message>,
}

impl SchedulerHandle {
    /// Enqueues `command` and awaits its terminal outcome. Submission
    /// order from a single caller is preserved for immediate
    /// (non-delayed) commands per §5's ordering guarantee.
    pub async fn send_command(&self, command: Command) -> Result<CommandOutcome> {
        let (ctx, reply) = CommandContext::new(command);
        self.sender
            .send(Message::Enqueue(ctx))
            .map_err(|_| EngineError::NotConnected)?;
        reply.await.map_err(|_| EngineError::Cancelled)
    }

    /// Called by the manager when an inbound frame's opcode matches a
    /// reply opcode; routed to the oldest unresolved in-flight context
    /// bearing that opcode (with a single in-flight slot, that is
    /// simply "the" in-flight context, if its opcode matches).
    pub fn notify_ack(&self, opcode: u16) {
        let _ = self.sender.send(Message::Ack(opcode));
    }

    /// §5 "disConnect cancels ... drains command queues with error."
    pub fn cancel_all(&self) {
        let _ = self.sender.send(Message::CancelAll);
    }
}

/// Spawns the dispatch loop task and returns a handle to it. The task
/// runs until `link` is dropped and the handle's sender is dropped.
pub fn spawn(
    link: Arc<dyn LinkStrategy>,
    events: EventBus,
    response_timeout: Duration,
) -> SchedulerHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(run(receiver, link, events, response_timeout));
    SchedulerHandle { sender }
}

async fn run(
    mut receiver: mpsc::UnboundedReceiver<Message>,
    link: Arc<dyn LinkStrategy>,
    events: EventBus,
    response_timeout: Duration,
) {
    let mut fifo: VecDeque<CommandContext> = VecDeque::new();
    let mut delayed: Vec<(Instant, CommandContext)> = Vec::new();
    let mut in_flight: Option<InFlight> = None;

    loop {
        let deadline = next_deadline(&in_flight, &delayed, response_timeout);

        tokio::select! {
            maybe_msg = receiver.recv() => {
                match maybe_msg {
                    None => break,
                    Some(Message::Enqueue(ctx)) => admit(ctx, &mut fifo, &mut delayed),
                    Some(Message::Ack(opcode)) => handle_ack(&mut in_flight, opcode, &events),
                    Some(Message::CancelAll) => {
                        drain_with_error(&mut fifo, &mut delayed, &mut in_flight, "disconnected");
                    }
                }
            }
            _ = sleep_until(deadline), if deadline.is_some() => {
                handle_timeout(&mut in_flight, response_timeout, &events);
            }
        }

        try_dispatch(&mut fifo, &mut delayed, &mut in_flight, &link, &events).await;
    }

    drain_with_error(&mut fifo, &mut delayed, &mut in_flight, "disconnected");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d.into()).await,
        None => std::future::pending::<()>().await,
    }
}

fn next_deadline(
    in_flight: &Option<InFlight>,
    delayed: &[(Instant, CommandContext)],
    response_timeout: Duration,
) -> Option<Instant> {
    if let Some(slot) = in_flight {
        return Some(slot.armed_at + response_timeout);
    }
    delayed.iter().map(|(fire_at, _)| *fire_at).min()
}

fn admit(ctx: CommandContext, fifo: &mut VecDeque<CommandContext>, delayed: &mut Vec<(Instant, CommandContext)>) {
    if ctx.command.delay_time > 0.0 {
        let fire_at = ctx.create_time + Duration::from_secs_f64(ctx.command.delay_time);
        delayed.push((fire_at, ctx));
    } else {
        fifo.push_back(ctx);
    }
}

fn handle_ack(in_flight: &mut Option<InFlight>, opcode: u16, events: &EventBus) {
    let Some(slot) = in_flight.take() else { return };
    if slot.opcode == opcode {
        events.publish(Event::CommandSuccess {
            index: slot.ctx.command.index,
            opcode,
        });
        slot.ctx.resolve(CommandOutcome::Success);
    } else {
        // Not our opcode: put the slot back untouched and keep waiting.
        *in_flight = Some(slot);
    }
}

fn handle_timeout(in_flight: &mut Option<InFlight>, response_timeout: Duration, events: &EventBus) {
    let Some(slot) = in_flight.take() else { return };

    if slot.ctx.command.is_loss_on_timeout || slot.retried {
        events.publish(Event::CommandTimeout {
            index: slot.ctx.command.index,
            opcode: slot.opcode,
            delay_efficacy: false,
        });
        slot.ctx.resolve(CommandOutcome::Timeout { delay_efficacy: false });
    } else {
        // Single automatic re-arm: inform observers it happened, keep
        // the caller's oneshot unresolved until the second miss.
        events.publish(Event::CommandTimeout {
            index: slot.ctx.command.index,
            opcode: slot.opcode,
            delay_efficacy: true,
        });
        *in_flight = Some(InFlight {
            armed_at: Instant::now(),
            retried: true,
            ..slot
        });
    }
    let _ = response_timeout; // timeout duration itself is read by next_deadline
}

async fn try_dispatch(
    fifo: &mut VecDeque<CommandContext>,
    delayed: &mut Vec<(Instant, CommandContext)>,
    in_flight: &mut Option<InFlight>,
    link: &Arc<dyn LinkStrategy>,
    events: &EventBus,
) {
    if in_flight.is_some() {
        return;
    }

    let now = Instant::now();
    let ready_delayed_idx = delayed
        .iter()
        .enumerate()
        .filter(|(_, (fire_at, _))| *fire_at <= now)
        .min_by_key(|(_, (_, ctx))| ctx.create_time)
        .map(|(idx, _)| idx);

    let next_ctx = match (fifo.front(), ready_delayed_idx) {
        (Some(front), Some(idx)) => {
            if front.create_time <= delayed[idx].1.create_time {
                fifo.pop_front()
            } else {
                Some(delayed.remove(idx).1)
            }
        }
        (Some(_), None) => fifo.pop_front(),
        (None, Some(idx)) => Some(delayed.remove(idx).1),
        (None, None) => None,
    };

    let Some(ctx) = next_ctx else { return };
    let opcode = ctx.command.opcode;
    let framed = frame_command(opcode, &ctx.command.data);

    match link.send_data(&framed).await {
        Ok(()) => {
            *in_flight = Some(InFlight {
                ctx,
                opcode,
                armed_at: Instant::now(),
                retried: false,
            });
        }
        Err(e) => {
            events.publish(Event::CommandError {
                index: ctx.command.index,
                opcode,
                message: e.to_string(),
            });
            ctx.resolve(CommandOutcome::Error(e.to_string()));
        }
    }
}

fn drain_with_error(
    fifo: &mut VecDeque<CommandContext>,
    delayed: &mut Vec<(Instant, CommandContext)>,
    in_flight: &mut Option<InFlight>,
    reason: &str,
) {
    for ctx in fifo.drain(..) {
        ctx.resolve(CommandOutcome::Error(reason.to_string()));
    }
    for (_, ctx) in delayed.drain(..) {
        ctx.resolve(CommandOutcome::Error(reason.to_string()));
    }
    if let Some(slot) = in_flight.take() {
        slot.ctx.resolve(CommandOutcome::Error(reason.to_string()));
    }
}

// `oneshot` is re-exported through `CommandContext`; referenced here so
// downstream callers constructing contexts directly can name the type
// without an extra `use`.
pub type Reply = oneshot::Receiver<CommandOutcome>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubLink {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LinkStrategy for StubLink {
        async fn connect(&self, _device: &Device) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn send_data(&self, _data: &[u8]) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EngineError::ConnectionFailed("stub failure".into()))
            } else {
                Ok(())
            }
        }
        async fn set_on_receive(&self, _callback: crate::link::ReceiveCallback) {}
    }

    #[tokio::test]
    async fn successful_round_trip_resolves_success() {
        let link: Arc<dyn LinkStrategy> = Arc::new(StubLink { sent: AtomicUsize::new(0), fail: false });
        let events = EventBus::new();
        let handle = spawn(link, events, Duration::from_millis(200));

        let command = Command::immediate(crate::opcode::OP_READ_BATTERY, vec![], 0);
        let index = command.index;
        let send_fut = handle.send_command(command);

        // Give the dispatch loop a moment to pick up and send the command.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.notify_ack(crate::opcode::OP_READ_BATTERY);

        let outcome = tokio::time::timeout(Duration::from_secs(1), send_fut)
            .await
            .expect("scheduler should resolve promptly")
            .expect("link available");
        assert!(matches!(outcome, CommandOutcome::Success));
        let _ = index;
    }

    #[tokio::test]
    async fn timeout_without_loss_policy_escalates_after_one_rearm() {
        let link: Arc<dyn LinkStrategy> = Arc::new(StubLink { sent: AtomicUsize::new(0), fail: false });
        let events = EventBus::new();
        let mut sub = events.subscribe();
        let handle = spawn(link, events, Duration::from_millis(50));

        let command = Command::immediate(crate::opcode::OP_READ_BATTERY, vec![], 0);
        let send_fut = handle.send_command(command);

        let outcome = tokio::time::timeout(Duration::from_secs(1), send_fut)
            .await
            .expect("scheduler should eventually escalate")
            .expect("link available");
        assert!(matches!(
            outcome,
            CommandOutcome::Timeout { delay_efficacy: false }
        ));

        let mut saw_soft_timeout = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(10), sub.recv()).await
        {
            if let Event::CommandTimeout { delay_efficacy: true, .. } = event {
                saw_soft_timeout = true;
            }
        }
        assert!(saw_soft_timeout, "expected one delay_efficacy=true timeout before the terminal one");
    }

    #[tokio::test]
    async fn cancel_all_drains_queue_with_error() {
        let link: Arc<dyn LinkStrategy> = Arc::new(StubLink { sent: AtomicUsize::new(0), fail: false });
        let events = EventBus::new();
        let handle = spawn(link, events, Duration::from_secs(5));

        let command = Command::delayed(crate::opcode::OP_READ_BATTERY, vec![], 0, 10.0);
        let send_fut = handle.send_command(command);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel_all();

        let outcome = tokio::time::timeout(Duration::from_secs(1), send_fut)
            .await
            .expect("cancel should resolve promptly")
            .expect("link available");
        assert!(matches!(outcome, CommandOutcome::Error(_)));
    }
}
