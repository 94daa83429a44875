pub mod mock;
pub mod settings;
pub mod transport;

pub use mock::MockTransport;
pub use settings::{FlowControl, Parity, SerialSettings, DEFAULT_BAUD_RATE};
pub use transport::{SerialTransport, Transport};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialDeviceInfo {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Not connected")]
    NotConnected,

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Read failed: expected {expected} bytes, {available} available")]
    ReadFailed { expected: usize, available: usize },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// Whether the channel has to be reconnected before it can be used again.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            SerialError::NotConnected | SerialError::ConnectionFailed(_) | SerialError::PortNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;
