//! Data model shared by the connection manager, discovery, and
//! provisioning flow: §3 of the spec.
//!
//! Grounded on `examples/original_source/mxSdk/{ConnType.h,
//! FirmwareType.h, Device.h, ConnModel.h}`. The Objective-C originals
//! expose `ConnType`/`FirmwareType` as `NS_ENUM` bitsets over
//! `NSUInteger`; this crate keeps the same bit values but as typed
//! `bitflags`-style newtypes over `u16` so unused/reserved bits still
//! round-trip through serialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reachable link types for a device. Bit values match
/// `ConnType.h`: `ConnTypeBLE = 1<<0`, `ConnTypeWiFi = 1<<1`,
/// `ConnTypeAP = 1<<2` (bits 3-7 reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnTypes(pub u16);

impl ConnTypes {
    pub const NONE: ConnTypes = ConnTypes(0);
    pub const BLE: ConnTypes = ConnTypes(1 << 0);
    pub const WIFI: ConnTypes = ConnTypes(1 << 1);
    pub const AP: ConnTypes = ConnTypes(1 << 2);

    pub fn contains(self, other: ConnTypes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ConnTypes) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ConnTypes) {
        self.0 &= !other.0;
    }

    pub fn is_ap_or_wifi(self) -> bool {
        self.contains(ConnTypes::AP) || self.contains(ConnTypes::WIFI)
    }
}

impl std::ops::BitOr for ConnTypes {
    type Output = ConnTypes;
    fn bitor(self, rhs: ConnTypes) -> ConnTypes {
        ConnTypes(self.0 | rhs.0)
    }
}

/// The single link a device is currently using, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnType {
    Ble,
    Wifi,
    Ap,
}

/// Upgradable firmware classes. Bit values match `FirmwareType.h`:
/// `FirmwareTypeMCU = 1<<8`, `FirmwareTypeWiFi = 1<<9` (bits 10-15 reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareKind(pub u16);

impl FirmwareKind {
    pub const MCU: FirmwareKind = FirmwareKind(1 << 8);
    pub const WIFI: FirmwareKind = FirmwareKind(1 << 9);
}

/// `PaperType.h`: supplemented from original_source, carried alongside
/// `RowLayoutDirection` as a print-parameter field (§11 of SPEC_FULL.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperType {
    A4,
    UsLetter,
    B5,
}

/// `RowLayoutDirection.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowLayoutDirection {
    Vertical,
    Horizontal,
}

/// Pre-connect view of a discovered peripheral (§3 "ConnModel").
/// Carries whatever the advertisement exposed; folded into a `Device` on
/// successful connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnModel {
    pub aliases: String,
    pub conn_types: ConnTypes,
    pub firmware_configs: HashMap<u16, u16>,
    /// BLE peripheral identifier (platform UUID), if seen over BLE.
    pub uuid_identifier: Option<String>,
    pub local_name: Option<String>,
    pub bluetooth_name: Option<String>,
    pub mac: Option<String>,
    pub state: i32,
    pub wifi_name: Option<String>,
    pub ip: Option<String>,
    pub port: u16,
}

impl ConnModel {
    pub fn is_wifi_ready(&self) -> bool {
        self.conn_types.contains(ConnTypes::WIFI) && self.ip.is_some() && self.port > 0
    }

    pub fn contains_firmware_type(&self, kind: FirmwareKind) -> bool {
        self.firmware_configs.contains_key(&kind.0)
    }

    /// Eligible for provisioning iff the advertised firmware configs
    /// contain the Wi-Fi firmware class with BLE listed as an upgrade
    /// path for it (§4.6).
    pub fn is_provisioning_eligible(&self) -> bool {
        self.firmware_configs
            .get(&FirmwareKind::WIFI.0)
            .map(|&conn_types| conn_types & ConnTypes::BLE.0 != 0)
            .unwrap_or(false)
    }
}

/// The identity and full mutable state of an active or previously-seen
/// device (§3 "Device"). Identity is `(uuid, mac)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub aliases: String,
    pub short_aliases: String,

    pub conn_types: ConnTypes,
    pub conn_type: Option<ConnType>,
    pub firmware_configs: HashMap<u16, u16>,

    pub uuid_identifier: Option<String>,
    pub bluetooth_name: Option<String>,
    pub local_name: Option<String>,
    pub rssi: i32,

    pub ssid: Option<String>,
    pub wifi_name: Option<String>,
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub port: u16,
    pub state: i32,

    pub battery_level: i32,
    pub cycles: i32,
    pub current_temperature: f32,
    pub direction: i32,
    pub distance: i32,
    pub printer_head: i32,
    pub printer_head_id: Option<String>,
    pub repeat_time: i32,
    pub temperature: f32,
    pub is_connected: bool,
    pub silent_state: bool,
    pub auto_power_off_state: bool,

    pub mcu_model: Option<String>,
    pub mcu_version: Option<String>,
    pub mcu_hw_version: Option<String>,
    pub wifi_model: Option<String>,
    pub wifi_version: Option<String>,
    pub wifi_hw_version: Option<String>,

    pub paper_type: PaperType,
}

impl Device {
    pub fn from_conn_model(model: &ConnModel, aliases: impl Into<String>) -> Self {
        Device {
            name: model
                .local_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            aliases: aliases.into(),
            short_aliases: String::new(),
            conn_types: model.conn_types,
            conn_type: None,
            firmware_configs: model.firmware_configs.clone(),
            uuid_identifier: model.uuid_identifier.clone(),
            bluetooth_name: model.bluetooth_name.clone(),
            local_name: model.local_name.clone(),
            rssi: -1,
            ssid: None,
            wifi_name: model.wifi_name.clone(),
            ip: model.ip.clone(),
            mac: model.mac.clone(),
            port: model.port,
            state: model.state,
            battery_level: -1,
            cycles: 0,
            current_temperature: 0.0,
            direction: 0,
            distance: 0,
            printer_head: 0,
            printer_head_id: None,
            repeat_time: 0,
            temperature: 0.0,
            is_connected: false,
            silent_state: false,
            auto_power_off_state: false,
            mcu_model: None,
            mcu_version: None,
            mcu_hw_version: None,
            wifi_model: None,
            wifi_version: None,
            wifi_hw_version: None,
            paper_type: PaperType::A4,
        }
    }

    /// Invariant: `connType ∈ connTypes`.
    pub fn is_conn_type_consistent(&self) -> bool {
        match self.conn_type {
            None => true,
            Some(ConnType::Ble) => self.conn_types.contains(ConnTypes::BLE),
            Some(ConnType::Wifi) => self.conn_types.contains(ConnTypes::WIFI),
            Some(ConnType::Ap) => self.conn_types.contains(ConnTypes::AP),
        }
    }

    /// Invariant: if `connType = AP|WiFi` then `ip ≠ ∅ ∧ port > 0`.
    pub fn has_required_network_address(&self) -> bool {
        match self.conn_type {
            Some(ConnType::Ap) | Some(ConnType::Wifi) => {
                self.ip.as_deref().is_some_and(|s| !s.is_empty()) && self.port > 0
            }
            _ => true,
        }
    }

    pub fn is_eligible_firmware_type_mcu(&self) -> bool {
        self.firmware_configs.contains_key(&FirmwareKind::MCU.0)
    }

    pub fn is_eligible_firmware_type_wifi(&self) -> bool {
        self.firmware_configs.contains_key(&FirmwareKind::WIFI.0)
    }
}
