use thiserror::Error;

/// Error taxonomy for the transport and data-preparation engine.
///
/// Mirrors the connection-manager/scheduler/packet-engine error kinds a
/// caller can observe, plus the lower-level `Io`/`Json` conversions used
/// throughout the link and cache-file code.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("response timeout waiting for opcode {opcode:#06x}")]
    ResponseTimeout { opcode: u16 },

    #[error("max consecutive errors ({0}) exceeded, transfer aborted")]
    MaxErrorsExceeded(u32),

    #[error("operation cancelled")]
    Cancelled,

    #[error("command queue is not empty")]
    QueueBusy,

    #[error("not connected to a device")]
    NotConnected,

    #[error("malformed or unexpected acknowledgement: {0}")]
    BadAck(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable numeric code surfaced to host-application callers, matching
    /// the `SyncingDataError = 100` / `CommandQueueIsNoEmptyError = 200`
    /// convention named in the wire interface; everything else is a
    /// descriptive string with no assigned code.
    pub fn code(&self) -> Option<u32> {
        match self {
            EngineError::QueueBusy => Some(200),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
