//! Link strategy layer (§4.1): one `{connect, disconnect, send_data,
//! on_receive}` contract shared by BLE, TCP, and AP-TCP, plus the
//! independent UDP discovery channel.
//!
//! Grounded on `examples/original_source/mxSdk/{ConnectionStrategy.h,
//! ConnectionFactory.h, BLEConnection.h, TCPConnection.h}`: the
//! Objective-C protocol declares exactly `connect`/`disConnect`/
//! `sendData:`/`receiveData:`, and a factory maps a `ConnectionType`
//! enum to a conformer. The I/O patterns themselves (chunked BLE
//! writes with adaptive fallback, pooled TCP connections with
//! keepalive) are grounded on the teacher's `printer.rs`
//! `print_bluetooth`/`print_network`.

pub mod ap;
pub mod ble;
pub mod tcp;
pub mod udp_discovery;

use crate::device::{ConnType, Device};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A byte pipe to a single connected device. Implementors run their
/// I/O on their own tasks and post inbound bytes to `on_receive`
/// rather than exposing a blocking read, matching §5's "inbound byte
/// callbacks are posted back onto the manager queue before touching
/// shared state."
#[async_trait]
pub trait LinkStrategy: Send + Sync {
    async fn connect(&self, device: &Device) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn send_data(&self, data: &[u8]) -> Result<()>;

    /// Registers the callback invoked with each inbound byte chunk.
    /// Implementations hold at most one such callback at a time,
    /// matching the single `onReceive` slot in the original protocol.
    async fn set_on_receive(&self, callback: ReceiveCallback);
}

pub type ReceiveCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Constructs the link strategy implementation for a given `ConnType`,
/// mirroring `ConnectionFactory.connectionStrategyForType:`. The AP
/// strategy reuses the TCP strategy's wire behavior per §4.1 ("same
/// wire protocol as TCP").
pub fn strategy_for(
    conn_type: ConnType,
    config: &crate::config::EngineConfig,
    events: crate::events::EventBus,
) -> Arc<dyn LinkStrategy> {
    match conn_type {
        ConnType::Ble => Arc::new(ble::BleLink::new(config.ble_scan_timeout)),
        ConnType::Wifi => Arc::new(tcp::TcpLink::new(
            config.tcp_connect_timeout,
            config.tcp_heartbeat_interval,
            config.tcp_heartbeat_payload.clone(),
            config.tcp_max_reconnect_attempts,
            config.tcp_reconnect_interval,
            events,
        )),
        ConnType::Ap => Arc::new(ap::ApLink::new(tcp::TcpLink::new(
            config.tcp_connect_timeout,
            config.tcp_heartbeat_interval,
            config.tcp_heartbeat_payload.clone(),
            config.tcp_max_reconnect_attempts,
            config.tcp_reconnect_interval,
            events,
        ))),
    }
}

/// Shared holder for the single active link's receive callback slot;
/// used by `TcpLink`/`BleLink` so `set_on_receive` composes cleanly
/// with the background I/O task each strategy spawns on `connect`.
pub(crate) type CallbackSlot = Arc<Mutex<Option<ReceiveCallback>>>;
