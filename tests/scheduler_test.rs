// Integration coverage of the command scheduler (command/scheduler.rs)
// driven through a fake link rather than the in-module stub, and
// tying it to the real wire codec (opcode.rs) so the frames the
// scheduler actually writes are checked, not just its outcomes.

mod common;

use common::RecordingLink;
use mxprint_engine::command::{Command, CommandOutcome};
use mxprint_engine::command::scheduler;
use mxprint_engine::events::EventBus;
use mxprint_engine::opcode::{self, OP_READ_BATTERY, OP_WRITE_PRINT_PARAMETERS};
use std::time::Duration;

#[tokio::test]
async fn immediate_commands_from_one_caller_dispatch_in_submission_order() {
    let link = RecordingLink::new();
    let events = EventBus::new();
    let handle = scheduler::spawn(link.clone(), events, Duration::from_millis(200));

    let opcodes = [OP_READ_BATTERY, OP_WRITE_PRINT_PARAMETERS, OP_READ_BATTERY];
    let mut joins = Vec::new();
    for (i, &opcode) in opcodes.iter().enumerate() {
        let handle = handle.clone();
        joins.push(tokio::spawn(async move {
            handle.send_command(Command::immediate(opcode, vec![i as u8], 0)).await
        }));
    }

    // Only one command is in flight at a time; ack each as it lands so
    // the next one in the FIFO gets dispatched, one at a time.
    for expected_count in 1..=opcodes.len() {
        let opcode = opcodes[expected_count - 1];
        loop {
            if link.sent_frames().await.len() >= expected_count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.notify_ack(opcode);
    }

    for join in joins {
        let outcome = join.await.unwrap().unwrap();
        assert!(matches!(outcome, CommandOutcome::Success));
    }

    let sent = link.sent_frames().await;
    assert_eq!(sent.len(), 3);
    for (frame, &expected_opcode) in sent.iter().zip(opcodes.iter()) {
        let (parsed, consumed) = opcode::parse_frame(frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(parsed.opcode, expected_opcode);
    }
    // FIFO order preserved across the three immediate sends: the
    // per-command payload byte (index `i`) shows up in submission order.
    for (i, frame) in sent.iter().enumerate() {
        let params_index = frame.len() - 3;
        assert_eq!(frame[params_index], i as u8);
    }
}

#[tokio::test]
async fn unacked_command_times_out_and_is_reported_via_outcome() {
    let link = RecordingLink::new();
    let events = EventBus::new();
    let handle = scheduler::spawn(link.clone(), events, Duration::from_millis(20));

    let outcome = handle
        .send_command(Command::immediate(OP_READ_BATTERY, vec![], 0))
        .await
        .unwrap();

    assert!(matches!(outcome, CommandOutcome::Timeout { .. }));
}

#[tokio::test]
async fn cancel_all_drains_outstanding_commands_with_an_error_outcome() {
    let link = RecordingLink::new();
    let events = EventBus::new();
    let handle = scheduler::spawn(link.clone(), events, Duration::from_secs(5));

    let pending = handle.clone();
    let join = tokio::spawn(async move {
        pending
            .send_command(Command::immediate(OP_READ_BATTERY, vec![], 0))
            .await
    });

    // give the in-flight command a moment to be admitted before cancelling
    tokio::time::sleep(Duration::from_millis(5)).await;
    handle.cancel_all();

    let outcome = join.await.unwrap().unwrap();
    assert!(matches!(outcome, CommandOutcome::Error(_)));
}
