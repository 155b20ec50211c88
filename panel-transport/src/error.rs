//! Device link error types

use thiserror::Error;

/// Errors that can occur while finding or talking to a panel
#[derive(Error, Debug)]
pub enum LinkError {
    /// No candidate path answered the handshake
    #[error("No panel found (searched: {0})")]
    NoDeviceFound(String),

    /// A candidate answered, but not with a panel handshake byte
    #[error("Protocol mismatch on {path}: response 0x{response:02X} is not a panel handshake")]
    ProtocolMismatch { path: String, response: u8 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    // Serial-specific errors
    #[error("Serial error: {0}")]
    Serial(String),

    #[error("Serial permission denied: {0}")]
    SerialPermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether discovery should simply be retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::NoDeviceFound(_)
                | LinkError::ProtocolMismatch { .. }
                | LinkError::Disconnected
                | LinkError::Timeout
        )
    }
}

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        let msg = e.to_string();
        match e.kind() {
            serialport::ErrorKind::NoDevice => LinkError::NoDeviceFound(msg),
            _ if msg.contains("Permission denied") || msg.contains("EACCES") => {
                LinkError::SerialPermissionDenied(msg)
            }
            _ => LinkError::Serial(msg),
        }
    }
}
