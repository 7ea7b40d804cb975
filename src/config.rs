//! Engine configuration and persisted preferences (SPEC_FULL.md §10).
//!
//! `EngineConfig` holds plain, non-secret tunables (scan/connect
//! timeouts, packet size preference, cache directory roots) and is
//! loaded/saved as JSON from a platform config directory, following
//! the teacher's `AppConfig`/`database_path()` pattern. Credentials
//! (wifi password, auto-connect identifiers) are never put in that
//! JSON file — they go through the OS keychain via `keyring`, matching
//! `store_auth_token`/`load_auth_token`/`delete_auth_token`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub version: String,

    /// Default timeout for a BLE scan session (§4.1).
    pub ble_scan_timeout: Duration,
    /// Default TCP connect timeout (§4.1, default 5s).
    pub tcp_connect_timeout: Duration,
    /// Application-level TCP heartbeat interval (§4.1, default 10s).
    pub tcp_heartbeat_interval: Duration,
    /// Caller-set heartbeat payload written on each tick (§4.1: "an
    /// application-level heartbeat whose payload is caller-set").
    /// Defaults to a framed `OP_CONNECT_STATE` query with no params,
    /// which the printer acknowledges like any other command; an empty
    /// payload falls back to a bare flush of the already-open socket.
    pub tcp_heartbeat_payload: Vec<u8>,
    /// Max TCP auto-reconnect attempts before `didFailToReconnect` (default 10).
    pub tcp_max_reconnect_attempts: u32,
    /// Interval between TCP reconnect attempts (default 10s).
    pub tcp_reconnect_interval: Duration,
    /// Response timeout for a single in-flight command (§4.3).
    pub command_response_timeout: Duration,
    /// UDP discovery channel bound port (§6, fixed at 6099).
    pub udp_discovery_port: u16,
    /// Consecutive non-progress packet responses before aborting a
    /// transfer (§4.4, `MAX_ERRORS = 10`).
    pub packet_max_errors: u32,
    /// Decimal places retained in reported transfer progress.
    pub progress_precision: u32,

    /// Root directories for the on-disk row/image/doc caches (§5
    /// "Shared resources": `image`, `data`, `mx`, `docs`).
    pub cache_roots: CacheRoots,

    /// Three boolean reminder suppressions named in §6 "Persisted
    /// preferences" (non-secret, so they live in this file rather than
    /// the keychain).
    pub suppress_ble_permission_reminder: bool,
    pub suppress_location_permission_reminder: bool,
    pub suppress_ap_join_reminder: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRoots {
    pub image: PathBuf,
    pub data: PathBuf,
    pub mx: PathBuf,
    pub docs: PathBuf,
}

impl EngineConfig {
    pub fn config_dir() -> PathBuf {
        if cfg!(target_os = "macos") {
            dirs::home_dir()
                .map(|p| p.join("Library/Application Support/com.mxprint.engine"))
                .unwrap_or_else(|| PathBuf::from("."))
        } else if cfg!(target_os = "windows") {
            dirs::config_dir()
                .map(|p| p.join("MxPrint Engine"))
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            dirs::config_dir()
                .map(|p| p.join("mxprint-engine"))
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }

    pub fn config_path(&self) -> PathBuf {
        Self::config_dir().join("config.json")
    }

    pub fn load_or_default() -> Self {
        let path = Self::config_dir().join("config.json");
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir)?;
        let contents = serde_json::to_string_pretty(self)
            .expect("EngineConfig serialization is infallible");
        std::fs::write(dir.join("config.json"), contents)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = Self::config_dir();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ble_scan_timeout: Duration::from_secs(10),
            tcp_connect_timeout: Duration::from_secs(5),
            tcp_heartbeat_interval: Duration::from_secs(10),
            tcp_heartbeat_payload: crate::opcode::frame_command(crate::opcode::OP_CONNECT_STATE, &[]),
            tcp_max_reconnect_attempts: 10,
            tcp_reconnect_interval: Duration::from_secs(10),
            command_response_timeout: Duration::from_secs(5),
            udp_discovery_port: 6099,
            packet_max_errors: 10,
            progress_precision: 2,
            cache_roots: CacheRoots {
                image: base.join("image"),
                data: base.join("data"),
                mx: base.join("mx"),
                docs: base.join("docs"),
            },
            suppress_ble_permission_reminder: false,
            suppress_location_permission_reminder: false,
            suppress_ap_join_reminder: false,
        }
    }
}

const KEYRING_SERVICE: &str = "mxprint-engine";

/// Persisted preference keys named in §6. Stored as keychain entries
/// (not plaintext config) because they carry the credential and the
/// identity the engine auto-connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceKey {
    AutoConnectDeviceIdentifier,
    AutoConnectDeviceMac,
    AutoConnectDeviceConnType,
    WifiName,
    WifiPassword,
}

impl PreferenceKey {
    fn keyring_user(self) -> &'static str {
        match self {
            PreferenceKey::AutoConnectDeviceIdentifier => "auto-connect-device-identifier",
            PreferenceKey::AutoConnectDeviceMac => "auto-connect-device-mac",
            PreferenceKey::AutoConnectDeviceConnType => "auto-connect-device-conn-type",
            PreferenceKey::WifiName => "wifi-name",
            PreferenceKey::WifiPassword => "wifi-password",
        }
    }
}

pub fn store_preference(key: PreferenceKey, value: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, key.keyring_user())
        .map_err(|e| format!("keyring init failed: {e}"))?;
    entry
        .set_password(value)
        .map_err(|e| format!("keyring store failed: {e}"))
}

pub fn load_preference(key: PreferenceKey) -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, key.keyring_user()).ok()?;
    entry.get_password().ok()
}

pub fn delete_preference(key: PreferenceKey) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, key.keyring_user())
        .map_err(|e| format!("keyring init failed: {e}"))?;
    match entry.delete_credential() {
        Ok(_) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(format!("keyring delete failed: {e}")),
    }
}
