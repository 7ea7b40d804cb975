//! Distribution-network provisioning flow (§4.6 steps 1-5): write Wi-Fi
//! credentials over an already-connected BLE link, then wait for the
//! UDP monitor to observe the target rejoin in `ready` state.
//!
//! Grounded on `examples/original_source/mxSdk/DistNetDevice.h` (the
//! provisioning-capable device's `mac`/`connTypes`/`firmwareConfigs`
//! carry over into the resulting `Device`) and §4.6's five-step flow.
//! The write itself reuses the command scheduler (§4.3) rather than a
//! bespoke send path, since a credentials write is just another
//! request/ACK command on the same half-duplex channel.

use crate::command::scheduler::SchedulerHandle;
use crate::command::{Command, CommandOutcome};
use crate::device::{ConnType, Device};
use crate::errors::{EngineError, Result};
use crate::events::{Event, EventBus};
use crate::link::udp_discovery::WifiRemoteModel;
use crate::opcode::OP_WRITE_WIFI_CREDENTIALS;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Packs `(ssid, password)` as the credentials command's params: two
/// NUL-terminated ASCII strings back to back. `ParameterUtils.h` packs
/// fixed-width NUL-padded string fields throughout the original; this
/// crate keeps the NUL-terminator convention without fixing a width,
/// since the transport already frames the command's total length.
fn pack_credentials(ssid: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(ssid.len() + password.len() + 2);
    out.extend_from_slice(ssid.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// Runs §4.6's provisioning flow to completion. `udp_frames` is the
/// connection manager's tap on the shared UDP discovery channel,
/// switched to DNW matching for the duration of this call; the
/// manager is responsible for restoring plain Wi-Fi heartbeat matching
/// afterward.
pub async fn distribution_network(
    scheduler: &SchedulerHandle,
    events: &EventBus,
    target: &Device,
    ssid: &str,
    password: &str,
    timeout_duration: Duration,
    udp_frames: &mut broadcast::Receiver<WifiRemoteModel>,
) -> Result<Device> {
    let target_mac = target
        .mac
        .clone()
        .ok_or_else(|| EngineError::InvalidParam("target device has no mac".into()))?;

    let command = Command::immediate(OP_WRITE_WIFI_CREDENTIALS, pack_credentials(ssid, password), 0);
    match scheduler.send_command(command).await? {
        CommandOutcome::Success => {}
        CommandOutcome::Error(msg) => return Err(EngineError::ConnectionFailed(msg)),
        CommandOutcome::Timeout { .. } => {
            return Err(EngineError::Timeout("credentials write".into()))
        }
    }

    let result = timeout(timeout_duration, async {
        loop {
            match udp_frames.recv().await {
                Ok(frame) if frame.mac == target_mac && frame.state == READY_STATE => {
                    return Some(frame);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match result {
        Ok(Some(frame)) => {
            let mut provisioned = target.clone();
            provisioned.ip = Some(frame.ip);
            provisioned.port = frame.port;
            provisioned.conn_type = Some(ConnType::Wifi);
            provisioned.is_connected = false;
            events.publish(Event::DistributionNetworkSucceed {
                device: Box::new(provisioned.clone()),
            });
            Ok(provisioned)
        }
        Ok(None) => {
            events.publish(Event::DistributionNetworkTimeOut);
            Err(EngineError::ConnectionFailed("udp channel closed".into()))
        }
        Err(_) => {
            events.publish(Event::DistributionNetworkTimeOut);
            Err(EngineError::Timeout("distribution network".into()))
        }
    }
}

/// `WifiRemoteModel.state` value meaning "rejoined and ready" (§4.6
/// step 4). The UDP frame format doesn't name states beyond this one
/// required value; other non-zero values are treated as "not yet".
const READY_STATE: i32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkStrategy, ReceiveCallback};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct AckingLink;

    #[async_trait]
    impl LinkStrategy for AckingLink {
        async fn connect(&self, _device: &Device) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        async fn send_data(&self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn set_on_receive(&self, _callback: ReceiveCallback) {}
    }

    fn sample_target() -> Device {
        let model = crate::device::ConnModel {
            aliases: "printer".into(),
            conn_types: crate::device::ConnTypes::BLE,
            firmware_configs: Default::default(),
            uuid_identifier: Some("uuid-1".into()),
            local_name: Some("MX-06".into()),
            bluetooth_name: Some("MX-06".into()),
            mac: Some("AA:BB:CC:DD:EE:FF".into()),
            state: 0,
            wifi_name: None,
            ip: None,
            port: 0,
        };
        Device::from_conn_model(&model, "printer")
    }

    #[tokio::test]
    async fn succeeds_when_matching_ready_frame_arrives() {
        let link: Arc<dyn LinkStrategy> = Arc::new(AckingLink);
        let events = EventBus::new();
        let scheduler = crate::command::scheduler::spawn(link, events.clone(), Duration::from_secs(1));
        let (tx, mut rx) = broadcast::channel(16);

        let target = sample_target();
        let mac = target.mac.clone().unwrap();

        let ack_scheduler = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ack_scheduler.notify_ack(OP_WRITE_WIFI_CREDENTIALS);
        });

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(WifiRemoteModel {
                mac,
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
            "printer-ap",
            "hunter2",
            Duration::from_secs(1),
            &mut rx,
        )
        .await
        .unwrap();

        assert_eq!(provisioned.ip.as_deref(), Some("192.168.4.1"));
        assert_eq!(provisioned.conn_type, Some(ConnType::Wifi));
    }

    #[tokio::test]
    async fn times_out_when_no_matching_frame_arrives() {
        let link: Arc<dyn LinkStrategy> = Arc::new(AckingLink);
        let events = EventBus::new();
        let scheduler = crate::command::scheduler::spawn(link, events.clone(), Duration::from_millis(10));
        let (_tx, mut rx) = broadcast::channel(16);

        let target = sample_target();
        let result = distribution_network(
            &scheduler,
            &events,
            &target,
            "printer-ap",
            "hunter2",
            Duration::from_millis(30),
            &mut rx,
        )
        .await;

        assert!(matches!(result, Err(EngineError::Timeout(_))));
    }
}
