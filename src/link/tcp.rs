//! TCP link strategy (§4.1 "TCP strategy"): connects to `ip:port`,
//! maintains an application-level heartbeat, and auto-reconnects on
//! unexpected drop up to a configured attempt count/interval.
//!
//! Grounded on the teacher's `printer.rs` `print_network` (persistent
//! connection with reconnect-on-failure) and `set_tcp_keepalive` (raw
//! socket2 keepalive configuration), generalized from a one-shot print
//! write into a held connection with an inbound read loop and
//! heartbeat ticker.

use super::{CallbackSlot, LinkStrategy, ReceiveCallback};
use crate::device::Device;
use crate::errors::{EngineError, Result};
use crate::events::{Event, EventBus};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

fn device_identifier(device: &Device) -> String {
    device
        .uuid_identifier
        .clone()
        .or_else(|| device.mac.clone())
        .unwrap_or_else(|| device.name.clone())
}

pub struct TcpLink {
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_payload: Vec<u8>,
    max_reconnect_attempts: u32,
    reconnect_interval: Duration,
    events: EventBus,

    stream: Arc<Mutex<Option<TcpStream>>>,
    callback: CallbackSlot,
    reconnect_attempts: Arc<AtomicU32>,
    connected: Arc<AtomicBool>,
    target: Arc<Mutex<Option<(String, u16)>>>,
    identifier: Arc<Mutex<Option<String>>>,
}

impl TcpLink {
    pub fn new(
        connect_timeout: Duration,
        heartbeat_interval: Duration,
        heartbeat_payload: Vec<u8>,
        max_reconnect_attempts: u32,
        reconnect_interval: Duration,
        events: EventBus,
    ) -> Self {
        TcpLink {
            connect_timeout,
            heartbeat_interval,
            heartbeat_payload,
            max_reconnect_attempts,
            reconnect_interval,
            events,
            stream: Arc::new(Mutex::new(None)),
            callback: Arc::new(Mutex::new(None)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            connected: Arc::new(AtomicBool::new(false)),
            target: Arc::new(Mutex::new(None)),
            identifier: Arc::new(Mutex::new(None)),
        }
    }

    fn set_keepalive(stream: &TcpStream) -> std::io::Result<()> {
        let sock = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        sock.set_tcp_keepalive(&keepalive)
    }

    async fn open(&self, ip: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{ip}:{port}");
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| EngineError::Timeout(format!("tcp connect to {addr}")))?
            .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true).ok();
        Self::set_keepalive(&stream).ok();
        Ok(stream)
    }

    fn spawn_io_loops(&self) {
        let stream_holder = self.stream.clone();
        let callback = self.callback.clone();
        let connected = self.connected.clone();
        let target = self.target.clone();
        let identifier = self.identifier.clone();
        let events = self.events.clone();
        let reconnect_attempts = self.reconnect_attempts.clone();
        let max_attempts = self.max_reconnect_attempts;
        let reconnect_interval = self.reconnect_interval;
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let read_result = {
                    let mut guard = stream_holder.lock().await;
                    match guard.as_mut() {
                        Some(stream) => stream.read(&mut buf).await,
                        None => break,
                    }
                };

                match read_result {
                    Ok(0) | Err(_) => {
                        connected.store(false, Ordering::SeqCst);
                        *stream_holder.lock().await = None;

                        let target_snapshot = target.lock().await.clone();
                        let Some((ip, port)) = target_snapshot else {
                            break;
                        };

                        let mut attempt = reconnect_attempts.load(Ordering::SeqCst);
                        let mut reconnected = false;
                        while attempt < max_attempts {
                            tokio::time::sleep(reconnect_interval).await;
                            let addr = format!("{ip}:{port}");
                            if let Ok(Ok(new_stream)) = tokio::time::timeout(
                                connect_timeout,
                                TcpStream::connect(&addr),
                            )
                            .await
                            {
                                new_stream.set_nodelay(true).ok();
                                TcpLink::set_keepalive(&new_stream).ok();
                                *stream_holder.lock().await = Some(new_stream);
                                connected.store(true, Ordering::SeqCst);
                                reconnect_attempts.store(0, Ordering::SeqCst);
                                reconnected = true;
                                break;
                            }
                            attempt += 1;
                            reconnect_attempts.store(attempt, Ordering::SeqCst);
                        }

                        if !reconnected {
                            // didFailToReconnect: stop the read loop for good.
                            let identifier = identifier.lock().await.clone().unwrap_or_default();
                            events.publish(Event::DidFailToReconnect { identifier });
                            break;
                        }
                    }
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        if let Some(cb) = callback.lock().await.as_ref() {
                            cb(chunk);
                        }
                    }
                }
            }
        });

        let stream_holder = self.stream.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_payload = self.heartbeat_payload.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                if !connected.load(Ordering::SeqCst) {
                    continue;
                }
                let mut guard = stream_holder.lock().await;
                if let Some(stream) = guard.as_mut() {
                    if !heartbeat_payload.is_empty() && stream.write_all(&heartbeat_payload).await.is_err() {
                        continue;
                    }
                    let _ = stream.flush().await;
                }
            }
        });
    }
}

#[async_trait]
impl LinkStrategy for TcpLink {
    async fn connect(&self, device: &Device) -> Result<()> {
        let ip = device
            .ip
            .clone()
            .ok_or_else(|| EngineError::InvalidParam("device has no ip".into()))?;
        let port = device.port;
        if port == 0 {
            return Err(EngineError::InvalidParam("device has no port".into()));
        }

        let stream = self.open(&ip, port).await?;
        *self.stream.lock().await = Some(stream);
        *self.target.lock().await = Some((ip, port));
        *self.identifier.lock().await = Some(device_identifier(device));
        self.connected.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.spawn_io_loops();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.target.lock().await = None;
        *self.stream.lock().await = None;
        Ok(())
    }

    async fn send_data(&self, data: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(EngineError::NotConnected);
        }
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(EngineError::NotConnected)?;
        tokio::time::timeout(Duration::from_secs(20), stream.write_all(data))
            .await
            .map_err(|_| EngineError::Timeout("tcp write".into()))?
            .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| EngineError::ConnectionFailed(e.to_string()))
    }

    async fn set_on_receive(&self, callback: ReceiveCallback) {
        *self.callback.lock().await = Some(callback);
    }
}
