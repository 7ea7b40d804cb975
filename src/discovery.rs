//! Discovery (§4.6): merges BLE scan results and UDP broadcast frames
//! into a single `ConnModel` set keyed by MAC.
//!
//! Grounded on `examples/original_source/mxSdk/ConnModel.h` (merge by
//! MAC, BLE manufacturer-data carries the MAC for peripherals not yet
//! MAC-addressable over the OS BLE stack) and the teacher's
//! `discovery.rs` scan-and-report loop pattern, adapted from raw
//! mDNS/SNMP probes to a `btleplug` central scan plus the
//! `link::udp_discovery` channel already built for §6's wire format.

use crate::device::{ConnModel, ConnTypes};
use crate::link::udp_discovery::WifiRemoteModel;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager;
use std::collections::HashMap;
use std::time::Duration;

/// Keyed by MAC when known, else by the BLE platform identifier (some
/// platforms never expose a MAC over the public BLE API — §4.6 still
/// wants those represented, just not mergeable with a UDP frame until
/// the printer's advertisement includes manufacturer-data MAC bytes).
fn merge_key(model: &ConnModel) -> String {
    model
        .mac
        .clone()
        .or_else(|| model.uuid_identifier.clone())
        .unwrap_or_default()
}

/// Accumulates discovered printers across both channels for the
/// lifetime of one scan session. Not `Send`-shared directly; the
/// connection manager owns one instance per active scan and folds
/// updates into it as BLE/UDP events arrive.
#[derive(Debug, Default)]
pub struct DiscoveryHub {
    models: HashMap<String, ConnModel>,
}

impl DiscoveryHub {
    pub fn new() -> Self {
        DiscoveryHub::default()
    }

    /// Folds a freshly-seen BLE peripheral into the set. Returns
    /// `true` if this is a newly-seen identifier (callers fire
    /// `onDeviceDiscover` only on first sight, per §4.2's "one
    /// `onDeviceDiscover` per unique identifier").
    pub fn observe_ble(&mut self, model: ConnModel) -> bool {
        let key = merge_key(&model);
        let is_new = !self.models.contains_key(&key);
        self.models
            .entry(key)
            .and_modify(|existing| merge_ble_into(existing, &model))
            .or_insert(model);
        is_new
    }

    /// Folds a UDP advertisement into the matching BLE-observed model,
    /// if any; UDP frames for printers never seen over BLE still
    /// create a Wi-Fi-only `ConnModel`.
    pub fn observe_udp(&mut self, frame: WifiRemoteModel) -> bool {
        let is_new = !self.models.contains_key(&frame.mac);
        self.models
            .entry(frame.mac.clone())
            .and_modify(|existing| merge_udp_into(existing, &frame))
            .or_insert_with(|| conn_model_from_udp(frame));
        is_new
    }

    pub fn get(&self, key: &str) -> Option<&ConnModel> {
        self.models.get(key)
    }

    pub fn snapshot(&self) -> Vec<ConnModel> {
        self.models.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }
}

fn merge_ble_into(existing: &mut ConnModel, fresh: &ConnModel) {
    existing.conn_types.insert(ConnTypes::BLE);
    existing.uuid_identifier = fresh.uuid_identifier.clone().or(existing.uuid_identifier.take());
    existing.local_name = fresh.local_name.clone().or(existing.local_name.take());
    existing.bluetooth_name = fresh.bluetooth_name.clone().or(existing.bluetooth_name.take());
    if fresh.mac.is_some() {
        existing.mac = fresh.mac.clone();
    }
    for (&kind, &conn_types) in &fresh.firmware_configs {
        existing.firmware_configs.insert(kind, conn_types);
    }
}

fn merge_udp_into(existing: &mut ConnModel, frame: &WifiRemoteModel) {
    existing.conn_types.insert(ConnTypes::WIFI);
    existing.wifi_name = Some(frame.ssid.clone());
    existing.ip = Some(frame.ip.clone());
    existing.port = frame.port;
    existing.state = frame.state;
}

fn conn_model_from_udp(frame: WifiRemoteModel) -> ConnModel {
    ConnModel {
        aliases: frame.ssid.clone(),
        conn_types: ConnTypes::WIFI,
        firmware_configs: HashMap::new(),
        uuid_identifier: None,
        local_name: None,
        bluetooth_name: None,
        mac: Some(frame.mac),
        state: frame.state,
        wifi_name: Some(frame.ssid),
        ip: Some(frame.ip),
        port: frame.port,
    }
}

/// Runs one BLE scan pass for `timeout`, reporting every advertised
/// peripheral whose platform identifier or local name isn't already
/// filtered out, as a bare `ConnModel` (no firmware configs — those
/// arrive only after GATT connect in this crate, since `btleplug`
/// doesn't surface manufacturer-data firmware bitmaps the way the
/// original's CoreBluetooth advertisement dictionary does).
pub async fn scan_ble(timeout: Duration) -> crate::errors::Result<Vec<ConnModel>> {
    use crate::errors::EngineError;

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
    tokio::time::sleep(timeout).await;
    adapter.stop_scan().await.ok();

    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| EngineError::ConnectionFailed(format!("ble peripheral list: {e}")))?;

    let mut models = Vec::new();
    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        models.push(ConnModel {
            aliases: props.local_name.clone().unwrap_or_default(),
            conn_types: ConnTypes::BLE,
            firmware_configs: HashMap::new(),
            uuid_identifier: Some(peripheral.id().to_string()),
            local_name: props.local_name.clone(),
            bluetooth_name: props.local_name,
            mac: mac_from_manufacturer_data(&props.manufacturer_data),
            state: 0,
            wifi_name: None,
            ip: None,
            port: 0,
        });
    }
    Ok(models)
}

/// The original advertises MAC as the trailing 6 bytes of a
/// manufacturer-data payload. `btleplug` keys `manufacturer_data` by
/// company id; this crate doesn't pin a specific company id (varies by
/// OEM batch), so it takes the first entry long enough to carry one.
fn mac_from_manufacturer_data(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<String> {
    manufacturer_data.values().find_map(|bytes| {
        if bytes.len() < 6 {
            return None;
        }
        let mac_bytes = &bytes[bytes.len() - 6..];
        Some(
            mac_bytes
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(":"),
        )
    })
}
