//! BLE link strategy (§4.1 "BLE strategy"): central-role GATT client.
//! Scans with a caller-provided timeout, connects, discovers a
//! writable characteristic and a notify characteristic, and chunks
//! writes to MTU-minus-3 with write-with/without-response chosen per
//! characteristic property.
//!
//! Grounded on the teacher's `printer.rs` `print_bluetooth`: manager →
//! adapter → scan → find peripheral by address → connect with timeout
//! → discover_services → find a writable characteristic with a
//! fallback UUID chain → chunked write with an adaptive chunk size
//! fallback (100B then 20B) → per-chunk timeout and inter-chunk delay.

use super::{CallbackSlot, LinkStrategy, ReceiveCallback};
use crate::device::Device;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Fallback UUID chain for the writable characteristic, matching the
/// teacher's Star/Generic printer UUID fallback in `print_bluetooth`.
const WRITE_CHARACTERISTIC_CANDIDATES: &[&str] = &[
    "49535343-8841-43f4-a8d4-ecbe34729bb3", // Star-style write-without-response
    "0000ffe1-0000-1000-8000-00805f9b34fb", // generic UART-style write
];

const NOTIFY_CHARACTERISTIC_CANDIDATES: &[&str] = &[
    "49535343-1e4d-4bd9-ba61-23c647249616",
    "0000ffe2-0000-1000-8000-00805f9b34fb",
];

const INITIAL_CHUNK: usize = 100;
const MIN_CHUNK: usize = 20;
const PER_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(10);

pub struct BleLink {
    scan_timeout: Duration,
    peripheral: Arc<Mutex<Option<Peripheral>>>,
    write_characteristic: Arc<Mutex<Option<Characteristic>>>,
    callback: CallbackSlot,
}

impl BleLink {
    pub fn new(scan_timeout: Duration) -> Self {
        BleLink {
            scan_timeout,
            peripheral: Arc::new(Mutex::new(None)),
            write_characteristic: Arc::new(Mutex::new(None)),
            callback: Arc::new(Mutex::new(None)),
        }
    }

    async fn find_peripheral(&self, identifier: &str) -> Result<Peripheral> {
        let manager = Manager::new()
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("ble manager init: {e}")))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("ble adapter list: {e}")))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ConnectionFailed("no bluetooth adapter".into()))?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("ble scan start: {e}")))?;
        tokio::time::sleep(self.scan_timeout).await;
        adapter.stop_scan().await.ok();

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("ble peripheral list: {e}")))?;

        for peripheral in peripherals {
            if peripheral.id().to_string() == identifier {
                return Ok(peripheral);
            }
            if let Ok(Some(props)) = peripheral.properties().await {
                if props.local_name.as_deref() == Some(identifier) {
                    return Ok(peripheral);
                }
            }
        }
        Err(EngineError::DeviceNotFound(identifier.to_string()))
    }

    async fn resolve_characteristic(
        peripheral: &Peripheral,
        candidates: &[&str],
    ) -> Option<Characteristic> {
        let characteristics = peripheral.characteristics();
        for candidate in candidates {
            if let Ok(uuid) = Uuid::parse_str(candidate) {
                if let Some(found) = characteristics.iter().find(|c| c.uuid == uuid) {
                    return Some(found.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl LinkStrategy for BleLink {
    async fn connect(&self, device: &Device) -> Result<()> {
        let identifier = device
            .uuid_identifier
            .clone()
            .or_else(|| device.bluetooth_name.clone())
            .ok_or_else(|| EngineError::InvalidParam("device has no ble identifier".into()))?;

        let peripheral = self.find_peripheral(&identifier).await?;
        tokio::time::timeout(Duration::from_secs(10), peripheral.connect())
            .await
            .map_err(|_| EngineError::Timeout("ble connect".into()))?
            .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("discover_services: {e}")))?;

        let write_char = Self::resolve_characteristic(&peripheral, WRITE_CHARACTERISTIC_CANDIDATES)
            .await
            .ok_or_else(|| EngineError::ConnectionFailed("no writable characteristic".into()))?;

        if let Some(notify_char) =
            Self::resolve_characteristic(&peripheral, NOTIFY_CHARACTERISTIC_CANDIDATES).await
        {
            peripheral
                .subscribe(&notify_char)
                .await
                .map_err(|e| EngineError::ConnectionFailed(format!("subscribe: {e}")))?;

            let callback = self.callback.clone();
            let mut notifications = peripheral
                .notifications()
                .await
                .map_err(|e| EngineError::ConnectionFailed(format!("notifications: {e}")))?;
            tokio::spawn(async move {
                while let Some(data) = notifications.next().await {
                    if let Some(cb) = callback.lock().await.as_ref() {
                        cb(data.value);
                    }
                }
            });
        }

        *self.write_characteristic.lock().await = Some(write_char);
        *self.peripheral.lock().await = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(peripheral) = self.peripheral.lock().await.take() {
            peripheral
                .disconnect()
                .await
                .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;
        }
        *self.write_characteristic.lock().await = None;
        Ok(())
    }

    async fn send_data(&self, data: &[u8]) -> Result<()> {
        let peripheral_guard = self.peripheral.lock().await;
        let peripheral = peripheral_guard.as_ref().ok_or(EngineError::NotConnected)?;
        let char_guard = self.write_characteristic.lock().await;
        let characteristic = char_guard.as_ref().ok_or(EngineError::NotConnected)?;

        let write_type = if characteristic
            .properties
            .contains(btleplug::api::CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        // Half-duplex: one outstanding write at a time, released here
        // on write-complete — the lock guards are held for the whole
        // chunked send so no other caller can interleave a write.
        //
        // Adaptive chunk size: start large for throughput, and shrink
        // to the safe BLE MTU minimum the first time a write fails,
        // retrying the same offset rather than the already-attempted
        // chunk.
        let mut chunk_size = INITIAL_CHUNK;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            let chunk = &data[offset..end];

            let attempt = tokio::time::timeout(
                PER_CHUNK_TIMEOUT,
                peripheral.write(characteristic, chunk, write_type),
            )
            .await;

            match attempt {
                Ok(Ok(())) => {
                    offset = end;
                }
                Ok(Err(e)) if chunk_size > MIN_CHUNK => {
                    warn!("ble write failed with {chunk_size}B chunks, falling back to {MIN_CHUNK}B: {e}");
                    chunk_size = MIN_CHUNK;
                    continue;
                }
                Ok(Err(e)) => {
                    return Err(EngineError::ConnectionFailed(e.to_string()));
                }
                Err(_) => {
                    return Err(EngineError::Timeout("ble write".into()));
                }
            }

            tokio::time::sleep(INTER_CHUNK_DELAY).await;
        }
        Ok(())
    }

    async fn set_on_receive(&self, callback: ReceiveCallback) {
        *self.callback.lock().await = Some(callback);
    }
}
