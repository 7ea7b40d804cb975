// Integration coverage of the distribution-network provisioning flow
// (provisioning.rs) wired to the real scheduler and the real wire
// codec, instead of the in-module test's minimal ack-only stub.

mod common;

use common::{sample_device, RecordingLink};
use mxprint_engine::command::scheduler;
use mxprint_engine::device::ConnType;
use mxprint_engine::errors::EngineError;
use mxprint_engine::events::EventBus;
use mxprint_engine::link::udp_discovery::WifiRemoteModel;
use mxprint_engine::opcode::{self, OP_WRITE_WIFI_CREDENTIALS};
use mxprint_engine::provisioning::distribution_network;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::test]
async fn writes_credentials_over_the_wire_and_resolves_once_the_target_rejoins() {
    let link = RecordingLink::new();
    let events = EventBus::new();
    let scheduler = scheduler::spawn(link.clone(), events.clone(), Duration::from_secs(1));
    let (udp_tx, mut udp_rx) = broadcast::channel(16);

    let target = sample_device("AA:BB:CC:DD:EE:FF", "uuid-provision-1");
    let mac = target.mac.clone().unwrap();

    let ack_link = link.clone();
    let ack_scheduler = scheduler.clone();
    tokio::spawn(async move {
        loop {
            if !ack_link.sent_frames().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        ack_scheduler.notify_ack(OP_WRITE_WIFI_CREDENTIALS);
    });

    let signal_mac = mac.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = udp_tx.send(WifiRemoteModel {
            mac: signal_mac,
            ssid: "printer-ap".into(),
            ip: "192.168.4.1".into(),
            port: 9100,
            state: 1,
        });
    });

    let provisioned = distribution_network(
        &scheduler,
        &events,
        &target,
        "my-wifi",
        "s3cr3t",
        Duration::from_secs(1),
        &mut udp_rx,
    )
    .await
    .unwrap();

    assert_eq!(provisioned.ip.as_deref(), Some("192.168.4.1"));
    assert_eq!(provisioned.port, 9100);
    assert_eq!(provisioned.conn_type, Some(ConnType::Wifi));
    assert!(!provisioned.is_connected);

    // The credentials actually went out as a well-formed, CRC-valid frame
    // carrying the NUL-terminated ssid/password pair.
    let sent = link.sent_frames().await;
    assert_eq!(sent.len(), 1);
    let (parsed, consumed) = opcode::parse_frame(&sent[0]).unwrap().unwrap();
    assert_eq!(consumed, sent[0].len());
    assert_eq!(parsed.opcode, OP_WRITE_WIFI_CREDENTIALS);
    let nul = parsed.params.iter().position(|&b| b == 0).unwrap();
    assert_eq!(&parsed.params[..nul], b"my-wifi");
    assert_eq!(&parsed.params[nul + 1..parsed.params.len() - 1], b"s3cr3t");
}

#[tokio::test]
async fn ignores_ready_frames_for_other_macs_before_matching_the_target() {
    let link = RecordingLink::new();
    let events = EventBus::new();
    let scheduler = scheduler::spawn(link.clone(), events.clone(), Duration::from_secs(1));
    let (udp_tx, mut udp_rx) = broadcast::channel(16);

    let target = sample_device("11:22:33:44:55:66", "uuid-provision-2");
    let mac = target.mac.clone().unwrap();

    let ack_link = link.clone();
    let ack_scheduler = scheduler.clone();
    tokio::spawn(async move {
        loop {
            if !ack_link.sent_frames().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        ack_scheduler.notify_ack(OP_WRITE_WIFI_CREDENTIALS);
    });

    let other_mac_tx = udp_tx.clone();
    let signal_mac = mac.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = other_mac_tx.send(WifiRemoteModel {
            mac: "FF:FF:FF:FF:FF:FF".into(),
            ssid: "someone-else".into(),
            ip: "10.0.0.9".into(),
            port: 1,
            state: 1,
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = udp_tx.send(WifiRemoteModel {
            mac: signal_mac,
            ssid: "printer-ap".into(),
            ip: "192.168.4.2".into(),
            port: 9100,
            state: 1,
        });
    });

    let provisioned = distribution_network(
        &scheduler,
        &events,
        &target,
        "my-wifi",
        "s3cr3t",
        Duration::from_secs(1),
        &mut udp_rx,
    )
    .await
    .unwrap();

    assert_eq!(provisioned.ip.as_deref(), Some("192.168.4.2"));
}

#[tokio::test]
async fn times_out_when_the_credentials_ack_never_arrives() {
    let link = RecordingLink::new();
    let events = EventBus::new();
    let scheduler = scheduler::spawn(link.clone(), events.clone(), Duration::from_millis(15));
    let (_udp_tx, mut udp_rx) = broadcast::channel(16);

    let target = sample_device("77:88:99:AA:BB:CC", "uuid-provision-3");
    let result = distribution_network(
        &scheduler,
        &events,
        &target,
        "my-wifi",
        "s3cr3t",
        Duration::from_millis(200),
        &mut udp_rx,
    )
    .await;

    assert!(matches!(result, Err(EngineError::Timeout(_))));
}
