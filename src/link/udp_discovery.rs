//! UDP discovery channel (§4.1, §6): binds a fixed well-known port
//! (6099), parses printer-broadcast advertisements into a
//! `WifiRemoteModel`, and publishes them independently of whichever
//! link strategy is currently connected.
//!
//! Grounded on the teacher's `discovery.rs` raw-UDP-socket functions
//! (`discover_ws_discovery`/`discover_epson_enpc`): bind a UDP socket,
//! loop `recv_from`, parse the payload, and report in a background
//! task. This channel's payload format is the simpler ASCII
//! `key=value` lines terminated by `\n` named in §6, not WS-Discovery's
//! SOAP or ENPC's binary framing — the original's mDNS/SNMP/CloudPRNT
//! specific logic does not apply here and is not carried over.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// `ScanType`/`UdpMonitorType` (§4.2) distinguish plain Wi-Fi heartbeat
/// monitoring from the provisioning-specific DNW (distribution
/// network wizard) mode; both observe the same frames, just with
/// different matching criteria applied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiRemoteModel {
    pub mac: String,
    pub ssid: String,
    pub ip: String,
    pub port: u16,
    pub state: i32,
}

/// Parses one ASCII `key=value\n`-delimited frame. Unknown keys are
/// ignored; `mac`, `ssid`, `ip`, `port`, and `state` are required.
pub fn parse_frame(payload: &[u8]) -> Option<WifiRemoteModel> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim(), value.trim());
        }
    }

    Some(WifiRemoteModel {
        mac: fields.get("mac")?.to_string(),
        ssid: fields.get("ssid").copied().unwrap_or("").to_string(),
        ip: fields.get("ip")?.to_string(),
        port: fields.get("port")?.parse().ok()?,
        state: fields.get("state")?.parse().ok()?,
    })
}

/// Runs the discovery receive loop until the socket is dropped or an
/// unrecoverable bind error occurs. Published frames are sent on
/// `sender`; the connection manager owns the receiving half and
/// decides how to route them (plain heartbeat vs. DNW match).
pub async fn run(port: u16, sender: mpsc::UnboundedSender<WifiRemoteModel>) -> std::io::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    socket.set_broadcast(true).ok();

    let mut buf = vec![0u8; 2048];
    loop {
        let (len, _addr) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(_) => continue,
        };
        if let Some(model) = parse_frame(&buf[..len]) {
            if sender.send(model).is_err() {
                break; // receiver dropped: channel torn down
            }
        }
    }
    Ok(())
}
