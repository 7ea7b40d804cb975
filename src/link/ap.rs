//! AP link strategy (§4.1 "AP strategy"): same wire protocol as TCP,
//! predicated on the phone already being joined to the printer's
//! hosted SSID. SSID sensing is delegated to the host application
//! (§1 "explicitly out of scope": it only names the interface here).

use super::tcp::TcpLink;
use super::{LinkStrategy, ReceiveCallback};
use crate::device::Device;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;

/// A host-provided probe answering "is this phone currently joined to
/// the printer's access point SSID?" — the collaborator §1 excludes
/// from this engine's scope.
pub trait ApJoinSensor: Send + Sync {
    fn is_joined_to(&self, ssid: &str) -> bool;
}

pub struct AlwaysJoined;
impl ApJoinSensor for AlwaysJoined {
    fn is_joined_to(&self, _ssid: &str) -> bool {
        true
    }
}

pub struct ApLink {
    inner: TcpLink,
    sensor: Box<dyn ApJoinSensor>,
}

impl ApLink {
    pub fn new(inner: TcpLink) -> Self {
        ApLink {
            inner,
            sensor: Box::new(AlwaysJoined),
        }
    }

    pub fn with_sensor(inner: TcpLink, sensor: Box<dyn ApJoinSensor>) -> Self {
        ApLink { inner, sensor }
    }
}

#[async_trait]
impl LinkStrategy for ApLink {
    async fn connect(&self, device: &Device) -> Result<()> {
        let ssid = device
            .ssid
            .as_deref()
            .ok_or_else(|| EngineError::InvalidParam("device has no ssid".into()))?;
        if !self.sensor.is_joined_to(ssid) {
            return Err(EngineError::ConnectionFailed(format!(
                "phone is not joined to access point {ssid}"
            )));
        }
        self.inner.connect(device).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn send_data(&self, data: &[u8]) -> Result<()> {
        self.inner.send_data(data).await
    }

    async fn set_on_receive(&self, callback: ReceiveCallback) {
        self.inner.set_on_receive(callback).await
    }
}
