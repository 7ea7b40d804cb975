//! Connection manager (§4.2): the singleton orchestrator tying
//! together link strategies, the command scheduler, the three packet
//! engines, discovery, provisioning, and the event bus behind the
//! public operations table (§6).
//!
//! Grounded on `examples/original_source/mxSdk/ConnectManager.h`
//! (singleton, three state machines, typed listener registries) with
//! the dispatch-loop *mechanics* — a single task owning all mutable
//! state, everything else posted to it as a message — grounded on the
//! teacher's `queue.rs`/`job_poller.rs` single-worker-task pattern.

use crate::command::scheduler::SchedulerHandle;
use crate::command::{Command, CommandOutcome};
use crate::config::EngineConfig;
use crate::device::{ConnType, Device};
use crate::discovery::{self, DiscoveryHub};
use crate::errors::{EngineError, Result};
use crate::events::{Event, EventBus, Subscription};
use crate::link::udp_discovery::WifiRemoteModel;
use crate::link::{self, LinkStrategy};
use crate::opcode::{
    parse_frame, OP_PRINT_COMPLETE, OP_PRINT_START, OP_READ_BATTERY, OP_READ_HEAD_TEMPERATURE,
};
use crate::packet::multi_row::{MultiRowDataPacket, MultiRowSendMode};
use crate::packet::single_blob::{BlobPacket, FH_LOGO, FH_OTA};
use crate::packet::{PacketEngineAction, PacketEngineState};
use crate::provisioning;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Idle,
    Ble,
    Dnw,
    ConnModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectType {
    Idle,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpMonitorType {
    Idle,
    Wifi,
    Dnw,
}

/// One of the three process-singleton data channels (§5 "Shared
/// resources"), distinguished only by the `fh` byte they frame with
/// and whether they track row boundaries.
enum DataChannel {
    MultiRow(MultiRowDataPacket),
    Logo(BlobPacket),
    Ota(BlobPacket),
}

impl DataChannel {
    fn state(&self) -> PacketEngineState {
        match self {
            DataChannel::MultiRow(p) => p.state(),
            DataChannel::Logo(p) => p.state(),
            DataChannel::Ota(p) => p.state(),
        }
    }

    fn on_control_byte(&mut self, byte: u8) -> Result<PacketEngineAction> {
        match self {
            DataChannel::MultiRow(p) => p.on_control_byte(byte),
            DataChannel::Logo(p) => p.on_control_byte(byte),
            DataChannel::Ota(p) => p.on_control_byte(byte),
        }
    }

    fn last_emitted(&self) -> Option<Vec<u8>> {
        match self {
            DataChannel::MultiRow(p) => p.last_emitted().map(|b| b.to_vec()),
            DataChannel::Logo(p) => p.last_emitted().map(|b| b.to_vec()),
            DataChannel::Ota(p) => p.last_emitted().map(|b| b.to_vec()),
        }
    }

    fn progress(&self) -> f64 {
        match self {
            DataChannel::MultiRow(p) => p.progress(),
            DataChannel::Logo(p) => p.progress(),
            DataChannel::Ota(p) => p.progress(),
        }
    }

    fn total_data_len(&self) -> u64 {
        match self {
            DataChannel::MultiRow(p) => p.total_data_len(),
            DataChannel::Logo(p) => p.total_data_len(),
            DataChannel::Ota(p) => p.total_data_len(),
        }
    }

    fn start_time_ms(&self) -> u64 {
        match self {
            DataChannel::MultiRow(p) => p.start_time_ms(),
            DataChannel::Logo(p) => p.start_time_ms(),
            DataChannel::Ota(p) => p.start_time_ms(),
        }
    }

    fn now_time_ms(&self) -> u64 {
        match self {
            DataChannel::MultiRow(p) => p.now_time_ms(),
            DataChannel::Logo(p) => p.now_time_ms(),
            DataChannel::Ota(p) => p.now_time_ms(),
        }
    }

    fn cancel(&mut self) {
        match self {
            DataChannel::MultiRow(p) => p.cancel(),
            DataChannel::Logo(p) => p.cancel(),
            DataChannel::Ota(p) => p.cancel(),
        }
    }
}

struct Inner {
    scan_type: ScanType,
    connect_type: ConnectType,
    udp_monitor_type: UdpMonitorType,
    device: Option<Device>,
    link: Option<Arc<dyn LinkStrategy>>,
    scheduler: Option<SchedulerHandle>,
    active_channel: Option<DataChannel>,
    discovery: DiscoveryHub,
}

impl Inner {
    fn new() -> Self {
        Inner {
            scan_type: ScanType::Idle,
            connect_type: ConnectType::Idle,
            udp_monitor_type: UdpMonitorType::Idle,
            device: None,
            link: None,
            scheduler: None,
            active_channel: None,
            discovery: DiscoveryHub::new(),
        }
    }
}

/// Singleton orchestrator (§4.2). One instance per host application
/// process; constructed once and shared behind an `Arc`.
pub struct ConnectionManager {
    config: EngineConfig,
    events: EventBus,
    inner: Mutex<Inner>,
    udp_broadcast: StdMutex<Option<broadcast::Sender<WifiRemoteModel>>>,
}

impl ConnectionManager {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(ConnectionManager {
            config,
            events: EventBus::new(),
            inner: Mutex::new(Inner::new()),
            udp_broadcast: StdMutex::new(None),
        })
    }

    pub fn subscribe_events(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// `discoverBleDevice(timeout)` (§4.2 table).
    pub async fn discover_ble_device(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.scan_type != ScanType::Idle {
                return Err(EngineError::InvalidParam("scan already in progress".into()));
            }
            inner.scan_type = ScanType::Ble;
            inner.discovery.clear();
        }
        self.events.publish(Event::DeviceStartDiscover);

        let models = discovery::scan_ble(timeout).await;
        let mut inner = self.inner.lock().await;
        if let Ok(models) = models {
            for model in models {
                let identifier = model
                    .uuid_identifier
                    .clone()
                    .or_else(|| model.mac.clone())
                    .unwrap_or_default();
                if inner.discovery.observe_ble(model) {
                    self.events.publish(Event::DeviceDiscover { identifier });
                }
            }
        }
        inner.scan_type = ScanType::Idle;
        drop(inner);
        self.events.publish(Event::DeviceStopDiscover);
        Ok(())
    }

    /// `connect(device)` (§4.2 table): cancels any scan, starts the
    /// chosen link strategy, and spawns the command scheduler.
    pub async fn connect(self: &Arc<Self>, device: Device) -> Result<()> {
        let conn_type = device
            .conn_type
            .ok_or_else(|| EngineError::InvalidParam("device has no conn_type selected".into()))?;

        {
            let mut inner = self.inner.lock().await;
            if inner.connect_type == ConnectType::Connected {
                return Err(EngineError::InvalidParam("already connected".into()));
            }
            inner.scan_type = ScanType::Idle;
            inner.connect_type = ConnectType::Connecting;
        }

        let identifier = device_identifier(&device);
        self.events.publish(Event::ConnectStart { identifier: identifier.clone() });

        let link = link::strategy_for(conn_type, &self.config, self.events.clone());
        if let Err(e) = link.connect(&device).await {
            let mut inner = self.inner.lock().await;
            inner.connect_type = ConnectType::Idle;
            drop(inner);
            self.events.publish(Event::ConnectFail {
                identifier: identifier.clone(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        let manager = self.clone();
        let identifier_for_callback = identifier.clone();
        link.set_on_receive(Arc::new(move |bytes| {
            let manager = manager.clone();
            let identifier = identifier_for_callback.clone();
            tokio::spawn(async move {
                manager.handle_inbound_bytes(bytes, identifier).await;
            });
        }))
        .await;

        let scheduler = crate::command::scheduler::spawn(
            link.clone(),
            self.events.clone(),
            self.config.command_response_timeout,
        );

        {
            let mut inner = self.inner.lock().await;
            let mut connected_device = device;
            connected_device.conn_type = Some(conn_type);
            connected_device.is_connected = true;
            inner.device = Some(connected_device);
            inner.link = Some(link);
            inner.scheduler = Some(scheduler);
            inner.connect_type = ConnectType::Connected;
            inner.udp_monitor_type = if conn_type == ConnType::Wifi {
                UdpMonitorType::Wifi
            } else {
                UdpMonitorType::Idle
            };
        }

        self.events.publish(Event::ConnectSucceed { identifier });
        Ok(())
    }

    /// §5 "disConnect cancels all scans, all packet engines, drains
    /// command queues with error, and tears down the link."
    pub async fn disconnect(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let identifier = inner.device.as_ref().map(device_identifier).unwrap_or_default();

        inner.scan_type = ScanType::Idle;
        inner.udp_monitor_type = UdpMonitorType::Idle;

        if let Some(channel) = inner.active_channel.as_mut() {
            channel.cancel();
            self.events.publish(Event::DataProgressError {
                cancelled: true,
                message: "disconnected".into(),
            });
        }
        inner.active_channel = None;

        if let Some(scheduler) = inner.scheduler.take() {
            scheduler.cancel_all();
        }

        if let Some(link) = inner.link.take() {
            let _ = link.disconnect().await;
        }

        inner.device = None;
        inner.connect_type = ConnectType::Idle;
        drop(inner);

        self.events.publish(Event::Disconnected { identifier });
        Ok(())
    }

    /// `sendCommand(data, opcode, delay, tag)` (§4.2 table).
    pub async fn send_command(
        self: &Arc<Self>,
        data: Vec<u8>,
        opcode: u16,
        delay_seconds: f64,
        tag: i32,
    ) -> Result<CommandOutcome> {
        let scheduler = {
            let inner = self.inner.lock().await;
            inner.scheduler.clone().ok_or(EngineError::NotConnected)?
        };
        let command = if delay_seconds > 0.0 {
            Command::delayed(opcode, data, tag, delay_seconds)
        } else {
            Command::immediate(opcode, data, tag)
        };
        scheduler.send_command(command).await
    }

    /// `setWithSendMultiRowDataPacket(rows, fn, type)` (§4.2 table):
    /// begins a chunked transfer. Rejects with `QueueBusy` if another
    /// data channel is already mid-transfer, matching
    /// `CommandQueueIsNoEmptyError` (§3 error code 200).
    pub async fn set_with_send_multi_row_data_packet(
        self: &Arc<Self>,
        rows: &[Vec<u8>],
        mode: MultiRowSendMode,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.connect_type != ConnectType::Connected {
            return Err(EngineError::NotConnected);
        }
        if let Some(channel) = inner.active_channel.as_ref() {
            if channel.state() != PacketEngineState::Idle
                && channel.state() != PacketEngineState::Done
                && channel.state() != PacketEngineState::Error
            {
                return Err(EngineError::QueueBusy);
            }
        }
        let mut packet = MultiRowDataPacket::new(self.config.progress_precision, mode);
        packet.set(rows, crate::packet::single_blob::FH_PICTURE);
        inner.active_channel = Some(DataChannel::MultiRow(packet));
        Ok(())
    }

    pub async fn set_with_send_logo_data_packet(self: &Arc<Self>, data: Vec<u8>) -> Result<()> {
        self.set_blob_channel(data, FH_LOGO, |p| DataChannel::Logo(p)).await
    }

    pub async fn set_with_send_ota_data_packet(self: &Arc<Self>, data: Vec<u8>) -> Result<()> {
        self.set_blob_channel(data, FH_OTA, |p| DataChannel::Ota(p)).await
    }

    async fn set_blob_channel(
        self: &Arc<Self>,
        data: Vec<u8>,
        fh: u8,
        wrap: impl FnOnce(BlobPacket) -> DataChannel,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.connect_type != ConnectType::Connected {
            return Err(EngineError::NotConnected);
        }
        let mut packet = BlobPacket::new(self.config.progress_precision);
        packet.set(data, fh);
        inner.active_channel = Some(wrap(packet));
        Ok(())
    }

    /// `cancelSendMultiRowDataPacket` / `cancelSendLogoDataPacket` /
    /// `cancelSendOtaDataPacket` (§5): transitions the active packet
    /// engine to Idle and surfaces `onDataProgressError(cancelled)`.
    pub async fn cancel_data_transfer(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if let Some(channel) = inner.active_channel.as_mut() {
            channel.cancel();
        }
        inner.active_channel = None;
        drop(inner);
        self.events.publish(Event::DataProgressError {
            cancelled: true,
            message: "cancelled".into(),
        });
    }

    /// `distributionNetwork(device, ssid, password, timeout)` (§4.2
    /// table / §4.6): switches the UDP monitor to DNW matching for the
    /// duration of the call, then restores whatever monitoring mode
    /// applied before.
    pub async fn distribution_network(
        self: &Arc<Self>,
        target: &Device,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Device> {
        let (scheduler, previous_monitor) = {
            let mut inner = self.inner.lock().await;
            let scheduler = inner.scheduler.clone().ok_or(EngineError::NotConnected)?;
            let previous = inner.udp_monitor_type;
            inner.udp_monitor_type = UdpMonitorType::Dnw;
            (scheduler, previous)
        };

        let mut rx = self.ensure_udp_monitor_running();

        let result = provisioning::distribution_network(
            &scheduler,
            &self.events,
            target,
            ssid,
            password,
            timeout,
            &mut rx,
        )
        .await;

        let mut inner = self.inner.lock().await;
        inner.udp_monitor_type = previous_monitor;
        result
    }

    /// Binds the UDP discovery socket on first use and fans its frames
    /// out on a broadcast channel so every caller awaiting a
    /// provisioning match (or a future plain Wi-Fi heartbeat listener)
    /// gets its own receiver, matching §4.1's "runs independently of
    /// the connected strategy."
    fn ensure_udp_monitor_running(self: &Arc<Self>) -> broadcast::Receiver<WifiRemoteModel> {
        let mut guard = self.udp_broadcast.lock().unwrap();
        if let Some(sender) = guard.as_ref() {
            return sender.subscribe();
        }

        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
        *guard = Some(broadcast_tx.clone());
        drop(guard);

        let (relay_tx, mut relay_rx) = mpsc::unbounded_channel();
        let port = self.config.udp_discovery_port;
        tokio::spawn(async move {
            let _ = crate::link::udp_discovery::run(port, relay_tx).await;
        });
        tokio::spawn(async move {
            while let Some(frame) = relay_rx.recv().await {
                let _ = broadcast_tx.send(frame);
            }
        });

        broadcast_rx
    }

    /// Inbound byte routing (§5 "inbound byte callbacks are posted
    /// back onto the manager queue before touching shared state"):
    /// parses the frame, routes printer→host opcodes (battery reads,
    /// print start/complete, ACKs) to the scheduler or event bus, and
    /// routes bare control bytes to the active data channel.
    async fn handle_inbound_bytes(self: &Arc<Self>, bytes: Vec<u8>, identifier: String) {
        let mut inner = self.inner.lock().await;

        if bytes.len() == 1 {
            if let Some(channel) = inner.active_channel.as_mut() {
                match channel.on_control_byte(bytes[0]) {
                    Ok(PacketEngineAction::Emitted) | Ok(PacketEngineAction::Retransmitted) => {
                        if let Some(packet) = channel.last_emitted() {
                            if let Some(link) = inner.link.clone() {
                                let _ = link.send_data(&packet).await;
                            }
                        }
                        self.events.publish(Event::DataProgress {
                            size: channel.total_data_len(),
                            fraction: channel.progress(),
                            precision: self.config.progress_precision,
                            start_time_ms: channel.start_time_ms(),
                            now_time_ms: channel.now_time_ms(),
                        });
                    }
                    Ok(PacketEngineAction::Done) => {
                        let progress = channel.progress();
                        self.events.publish(Event::DataProgressFinish { progress });
                    }
                    Ok(PacketEngineAction::Aborted) | Err(_) => {
                        self.events.publish(Event::DataProgressError {
                            cancelled: false,
                            message: "max consecutive errors exceeded".into(),
                        });
                    }
                    Ok(PacketEngineAction::NoOp) => {}
                }
                return;
            }
        }

        if let Ok(Some((frame, _consumed))) = parse_frame(&bytes) {
            match frame.opcode {
                OP_PRINT_START => self.events.publish(Event::PrintStart),
                OP_PRINT_COMPLETE => self.events.publish(Event::PrintComplete),
                OP_READ_BATTERY => {
                    if let Some(&level) = frame.params.first() {
                        self.events.publish(Event::ReadBattery {
                            identifier: identifier.clone(),
                            level: level as i32,
                        });
                    }
                    if let Some(scheduler) = inner.scheduler.as_ref() {
                        scheduler.notify_ack(frame.opcode);
                    }
                }
                OP_READ_HEAD_TEMPERATURE => {
                    if let Some(&celsius) = frame.params.first() {
                        self.events.publish(Event::ReadHeadTemperature {
                            identifier: identifier.clone(),
                            celsius: celsius as f32,
                        });
                    }
                    if let Some(scheduler) = inner.scheduler.as_ref() {
                        scheduler.notify_ack(frame.opcode);
                    }
                }
                opcode => {
                    if let Some(scheduler) = inner.scheduler.as_ref() {
                        scheduler.notify_ack(opcode);
                    }
                }
            }
        }
        let _ = identifier;
    }
}

fn device_identifier(device: &Device) -> String {
    device
        .uuid_identifier
        .clone()
        .or_else(|| device.mac.clone())
        .unwrap_or_else(|| device.name.clone())
}
