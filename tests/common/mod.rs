// Shared fixtures for the integration tests under tests/.

use async_trait::async_trait;
use mxprint_engine::device::{ConnModel, ConnTypes, Device};
use mxprint_engine::errors::Result;
use mxprint_engine::link::{LinkStrategy, ReceiveCallback};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// A `LinkStrategy` that records every write instead of touching real
/// hardware, and lets a test inject bytes as if the printer had sent
/// them (feeding back through whatever callback the manager
/// registered via `set_on_receive`).
pub struct RecordingLink {
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub connect_count: AtomicUsize,
    callback: Mutex<Option<ReceiveCallback>>,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingLink {
            sent: Mutex::new(Vec::new()),
            connect_count: AtomicUsize::new(0),
            callback: Mutex::new(None),
        })
    }

    pub async fn deliver(&self, bytes: Vec<u8>) {
        let callback = self.callback.lock().await.clone();
        if let Some(callback) = callback {
            callback(bytes);
        }
    }

    pub async fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl LinkStrategy for RecordingLink {
    async fn connect(&self, _device: &Device) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn send_data(&self, data: &[u8]) -> Result<()> {
        self.sent.lock().await.push(data.to_vec());
        Ok(())
    }

    async fn set_on_receive(&self, callback: ReceiveCallback) {
        *self.callback.lock().await = Some(callback);
    }
}

/// A discovered-over-BLE printer with sensible defaults, overridable
/// field by field.
pub fn sample_conn_model(mac: &str, uuid: &str) -> ConnModel {
    ConnModel {
        aliases: "MX-06".into(),
        conn_types: ConnTypes::BLE,
        firmware_configs: HashMap::new(),
        uuid_identifier: Some(uuid.into()),
        local_name: Some("MX-06".into()),
        bluetooth_name: Some("MX-06".into()),
        mac: Some(mac.into()),
        state: 0,
        wifi_name: None,
        ip: None,
        port: 0,
    }
}

pub fn sample_device(mac: &str, uuid: &str) -> Device {
    Device::from_conn_model(&sample_conn_model(mac, uuid), "printer")
}

/// A scratch cache directory for tests that persist `RowData`/
/// `MultiRowData` to disk; dropped (and cleaned up) at end of scope.
pub fn scratch_cache_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create scratch cache dir")
}
